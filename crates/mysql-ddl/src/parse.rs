//! Line-oriented parser for `SHOW CREATE TABLE` output.
//!
//! MySQL prints one column, index or constraint per line, so the parser
//! classifies each trimmed line by its leading keyword. Lines it does not
//! recognise (e.g. `CHECK` constraints, `SPATIAL KEY`) are skipped; a column
//! line it cannot interpret is an error, so columns are never dropped
//! silently.

use regex::Regex;
use std::sync::OnceLock;

use crate::structure::{
    ColumnDefinition, ForeignKey, IndexDefinition, IndexKind, ReferentialAction, TableStructure,
};

struct Patterns {
    create: Regex,
    column: Regex,
    primary: Regex,
    unique: Regex,
    fulltext: Regex,
    index: Regex,
    foreign_key: Regex,
    on_delete: Regex,
    on_update: Regex,
    option: Regex,
    quoted_name: Regex,
    column_type: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static pattern");
        Patterns {
            create: re(r"^CREATE TABLE `((?:[^`]|``)+)`"),
            column: re(r"^`((?:[^`]|``)+)`\s+(.*)$"),
            primary: re(r"^PRIMARY KEY\s*(?:USING \w+\s*)?\((.+)\)"),
            unique: re(r"^UNIQUE (?:KEY|INDEX) `((?:[^`]|``)+)`\s*\((.+)\)"),
            fulltext: re(r"^FULLTEXT (?:KEY|INDEX) `((?:[^`]|``)+)`\s*\((.+)\)"),
            index: re(r"^(?:KEY|INDEX) `((?:[^`]|``)+)`\s*\((.+)\)"),
            foreign_key: re(
                r"^CONSTRAINT `((?:[^`]|``)+)` FOREIGN KEY \(([^)]+)\) REFERENCES `((?:[^`]|``)+)` \(([^)]+)\)(.*)$",
            ),
            on_delete: re(r"ON DELETE (CASCADE|SET NULL|NO ACTION|RESTRICT|SET DEFAULT)"),
            on_update: re(r"ON UPDATE (CASCADE|SET NULL|NO ACTION|RESTRICT|SET DEFAULT)"),
            option: re(
                r"(?i)(ENGINE|DEFAULT CHARSET|CHARSET|COLLATE|AUTO_INCREMENT|COMMENT)\s*=\s*('(?:[^'\\]|\\.|'')*'|[^\s;,]+)",
            ),
            quoted_name: re(r"`((?:[^`]|``)+)`"),
            column_type: re(r"^[A-Za-z]+(\(.*\))?$"),
        }
    })
}

/// Parse a single `SHOW CREATE TABLE` statement.
///
/// Returns a diagnostic string when a column definition cannot be
/// interpreted or when the statement has no `CREATE TABLE` header.
pub fn parse_create_table(create_table: &str) -> Result<TableStructure, String> {
    let p = patterns();
    let mut table = TableStructure::default();
    let mut seen_header = false;
    let mut parsing_columns = false;

    for raw in create_table.lines() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with("/*") {
            continue;
        }

        if let Some(caps) = p.create.captures(line) {
            table.name = unquote_identifier(&caps[1]);
            seen_header = true;
            parsing_columns = true;
            continue;
        }

        if !parsing_columns {
            continue;
        }

        if line.starts_with(')') {
            parse_table_options(line, &mut table);
            parsing_columns = false;
            continue;
        }

        let line = line.strip_suffix(',').unwrap_or(line);

        if let Some(caps) = p.column.captures(line) {
            let name = unquote_identifier(&caps[1]);
            let column = parse_column_details(&name, &caps[2])?;
            table.columns.push(column);
            continue;
        }

        if let Some(caps) = p.primary.captures(line) {
            table.indexes.push(IndexDefinition {
                name: "PRIMARY".to_string(),
                kind: IndexKind::Primary,
                columns: quoted_names(&caps[1]),
            });
            continue;
        }

        for (re, kind) in [
            (&p.unique, IndexKind::Unique),
            (&p.fulltext, IndexKind::Fulltext),
            (&p.index, IndexKind::Index),
        ] {
            if let Some(caps) = re.captures(line) {
                table.indexes.push(IndexDefinition {
                    name: unquote_identifier(&caps[1]),
                    kind,
                    columns: quoted_names(&caps[2]),
                });
                break;
            }
        }

        if let Some(caps) = p.foreign_key.captures(line) {
            let rest = &caps[5];
            let action = |re: &Regex| {
                re.captures(rest)
                    .and_then(|c| ReferentialAction::parse(&c[1]))
                    .unwrap_or(ReferentialAction::NoAction)
            };
            table.foreign_keys.push(ForeignKey {
                name: unquote_identifier(&caps[1]),
                columns: quoted_names(&caps[2]),
                referenced_table: unquote_identifier(&caps[3]),
                referenced_columns: quoted_names(&caps[4]),
                on_delete: action(&p.on_delete),
                on_update: action(&p.on_update),
            });
        }
    }

    if !seen_header {
        return Err("Not a CREATE TABLE statement: missing `CREATE TABLE` header".to_string());
    }

    Ok(table)
}

fn parse_table_options(line: &str, table: &mut TableStructure) {
    for caps in patterns().option.captures_iter(line) {
        let name = caps[1].to_uppercase();
        let value = caps[2].trim();
        let value = strip_quotes(value).unwrap_or_else(|| value.to_string());
        table.options.insert(name, value);
    }
}

fn parse_column_details(name: &str, details: &str) -> Result<ColumnDefinition, String> {
    let fail = |why: String| format!("Unable to interpret column `{name}` ({details}): {why}");

    let tokens = tokenize(details).map_err(&fail)?;
    let mut iter = tokens.iter().map(String::as_str).peekable();

    let mut column_type = match iter.next() {
        Some(t) if patterns().column_type.is_match(t) => t.to_string(),
        Some(t) => return Err(fail(format!("'{t}' is not a column type"))),
        None => return Err(fail("missing column type".to_string())),
    };
    while let Some(modifier) = iter.next_if(|t| {
        matches!(
            t.to_uppercase().as_str(),
            "UNSIGNED" | "SIGNED" | "ZEROFILL"
        )
    }) {
        column_type.push(' ');
        column_type.push_str(modifier);
    }

    let mut nullable = true;
    let mut default = None;
    let mut extra: Vec<String> = Vec::new();
    let mut comment = None;

    while let Some(token) = iter.next() {
        let upper = token.to_uppercase();
        let mut next_value = |what: &str| {
            iter.next()
                .map(str::to_string)
                .ok_or_else(|| fail(format!("{what} without a value")))
        };

        match upper.as_str() {
            "NOT" => match next_value("NOT")?.to_uppercase().as_str() {
                "NULL" => nullable = false,
                other => return Err(fail(format!("unexpected 'NOT {other}'"))),
            },
            "NULL" => nullable = true,
            "DEFAULT" => default = Some(next_value("DEFAULT")?),
            "COMMENT" => {
                let value = next_value("COMMENT")?;
                comment = Some(strip_quotes(&value).unwrap_or(value));
            }
            "CHARACTER" => {
                // CHARACTER SET <name>
                next_value("CHARACTER SET")?;
                next_value("CHARACTER SET")?;
            }
            "CHARSET" | "COLLATE" | "SRID" => {
                next_value(token)?;
            }
            "ON" => {
                let keyword = next_value("ON")?;
                let expr = next_value("ON UPDATE")?;
                extra.push(format!("ON {} {expr}", keyword.to_uppercase()));
            }
            "GENERATED" => {
                // GENERATED ALWAYS AS (expr) [VIRTUAL|STORED]
                let always = next_value("GENERATED")?;
                let as_kw = next_value("GENERATED ALWAYS")?;
                let expr = next_value("GENERATED ALWAYS AS")?;
                extra.push(format!("GENERATED {always} {as_kw} {expr}"));
            }
            "AS" => {
                let expr = next_value("AS")?;
                extra.push(format!("AS {expr}"));
            }
            "AUTO_INCREMENT" | "VIRTUAL" | "STORED" | "INVISIBLE" | "VISIBLE" | "UNIQUE"
            | "KEY" | "PRIMARY" => extra.push(upper),
            _ if token.starts_with("/*") => {
                // Versioned comment such as `/*!80023 INVISIBLE */`
                let mut hint = vec![token.to_string()];
                if !token.ends_with("*/") {
                    for t in iter.by_ref() {
                        hint.push(t.to_string());
                        if t.ends_with("*/") {
                            break;
                        }
                    }
                }
                extra.push(hint.join(" "));
            }
            _ => return Err(fail(format!("unexpected '{token}'"))),
        }
    }

    Ok(ColumnDefinition {
        name: name.to_string(),
        column_type,
        nullable,
        default,
        extra: (!extra.is_empty()).then(|| extra.join(" ")),
        comment,
    })
}

/// Split column details on whitespace, keeping quoted strings and
/// parenthesised groups (`enum('a','b c')`, `decimal(10, 2)`) whole.
fn tokenize(details: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut chars = details.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == q {
                    if chars.peek() == Some(&q) {
                        // doubled quote inside a string
                        current.push(q);
                        chars.next();
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| "unbalanced ')'".to_string())?;
                    current.push(c);
                }
                c if c.is_whitespace() && depth == 0 => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn strip_quotes(value: &str) -> Option<String> {
    let inner = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))?;
    Some(inner.replace("''", "'").replace("\\'", "'"))
}

fn unquote_identifier(name: &str) -> String {
    name.replace("``", "`")
}

fn quoted_names(list: &str) -> Vec<String> {
    patterns()
        .quoted_name
        .captures_iter(list)
        .map(|c| unquote_identifier(&c[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = "CREATE TABLE `orders` (
  `id` bigint unsigned NOT NULL AUTO_INCREMENT,
  `customer_id` int NOT NULL,
  `status` enum('new','paid','shipped out') COLLATE utf8mb4_unicode_ci NOT NULL DEFAULT 'new',
  `total` decimal(10,2) DEFAULT NULL COMMENT 'Gross total, incl. tax',
  `notes` text CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci,
  `created_at` timestamp NULL DEFAULT NULL,
  `updated_at` timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
  PRIMARY KEY (`id`),
  UNIQUE KEY `orders_ref_unique` (`customer_id`,`created_at`),
  KEY `orders_updated_at_index` (`updated_at`),
  FULLTEXT KEY `orders_notes_fulltext` (`notes`),
  CONSTRAINT `orders_customer_fk` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`) ON DELETE CASCADE
) ENGINE=InnoDB AUTO_INCREMENT=12501 DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci COMMENT='Customer orders'";

    #[test]
    fn test_parse_columns() {
        let table = parse_create_table(ORDERS).unwrap();
        assert_eq!(table.name, "orders");

        let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "id",
                "customer_id",
                "status",
                "total",
                "notes",
                "created_at",
                "updated_at"
            ]
        );

        let id = table.column("id").unwrap();
        assert_eq!(id.column_type, "bigint unsigned");
        assert!(!id.nullable);
        assert_eq!(id.extra.as_deref(), Some("AUTO_INCREMENT"));

        let status = table.column("status").unwrap();
        assert_eq!(status.column_type, "enum('new','paid','shipped out')");
        assert_eq!(status.default.as_deref(), Some("'new'"));

        let total = table.column("total").unwrap();
        assert!(total.nullable);
        assert_eq!(total.default.as_deref(), Some("NULL"));
        assert_eq!(total.comment.as_deref(), Some("Gross total, incl. tax"));

        let updated = table.column("updated_at").unwrap();
        assert_eq!(updated.default.as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(
            updated.extra.as_deref(),
            Some("ON UPDATE CURRENT_TIMESTAMP")
        );
    }

    #[test]
    fn test_parse_indexes_and_foreign_keys() {
        let table = parse_create_table(ORDERS).unwrap();

        let primary = table.primary_key().unwrap();
        assert_eq!(primary.columns, ["id"]);

        let kinds: Vec<_> = table.indexes.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            [
                IndexKind::Primary,
                IndexKind::Unique,
                IndexKind::Index,
                IndexKind::Fulltext
            ]
        );
        assert_eq!(table.indexes[1].columns, ["customer_id", "created_at"]);

        let fk = &table.foreign_keys[0];
        assert_eq!(fk.name, "orders_customer_fk");
        assert_eq!(fk.columns, ["customer_id"]);
        assert_eq!(fk.referenced_table, "customers");
        assert_eq!(fk.referenced_columns, ["id"]);
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(fk.on_update, ReferentialAction::NoAction);
    }

    #[test]
    fn test_parse_table_options() {
        let table = parse_create_table(ORDERS).unwrap();
        assert_eq!(table.options.get("ENGINE").map(String::as_str), Some("InnoDB"));
        assert_eq!(
            table.options.get("AUTO_INCREMENT").map(String::as_str),
            Some("12501")
        );
        assert_eq!(
            table.options.get("DEFAULT CHARSET").map(String::as_str),
            Some("utf8mb4")
        );
        assert_eq!(
            table.options.get("COLLATE").map(String::as_str),
            Some("utf8mb4_unicode_ci")
        );
        assert_eq!(
            table.options.get("COMMENT").map(String::as_str),
            Some("Customer orders")
        );
    }

    #[test]
    fn test_index_prefix_lengths_are_dropped() {
        let ddl = "CREATE TABLE `t` (\n  `a` varchar(255) NOT NULL,\n  KEY `t_a_index` (`a`(191))\n) ENGINE=InnoDB";
        let table = parse_create_table(ddl).unwrap();
        assert_eq!(table.indexes[0].columns, ["a"]);
    }

    #[test]
    fn test_uninterpretable_column_is_an_error() {
        let ddl = "CREATE TABLE `t` (\n  `a` int NOT NULL FROBNICATE,\n  PRIMARY KEY (`a`)\n)";
        let err = parse_create_table(ddl).unwrap_err();
        assert!(err.contains("`a`"), "{err}");
        assert!(err.contains("FROBNICATE"), "{err}");
    }

    #[test]
    fn test_unterminated_default_is_an_error() {
        let ddl = "CREATE TABLE `t` (\n  `a` varchar(5) DEFAULT 'oops\n)";
        assert!(parse_create_table(ddl).is_err());
    }

    #[test]
    fn test_missing_header_is_an_error() {
        assert!(parse_create_table("SELECT 1").is_err());
    }

    #[test]
    fn test_changed_columns() {
        let before = parse_create_table(
            "CREATE TABLE `t` (\n  `a` int NOT NULL,\n  `b` varchar(10) DEFAULT NULL\n)",
        )
        .unwrap();
        let after = parse_create_table(
            "CREATE TABLE `t` (\n  `a` bigint NOT NULL,\n  `c` json DEFAULT NULL\n)",
        )
        .unwrap();
        assert_eq!(before.changed_columns(&after), ["a", "b", "c"]);
    }

    #[test]
    fn test_serializes_to_json() {
        let table = parse_create_table(ORDERS).unwrap();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["indexes"][0]["kind"], "primary");
        assert_eq!(json["foreign_keys"][0]["on_delete"], "CASCADE");
    }
}
