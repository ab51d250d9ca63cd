//! Creation-statement normalisation for drift detection.

/// Tokens removed before two creation statements are compared.
///
/// Character set and collation clauses differ between servers with
/// different defaults without the table shape differing.
const COSMETIC_TOKENS: [&str; 4] = ["CHARACTER SET ", "COLLATE ", "utf8mb4 ", "utf8mb4_unicode_ci "];

/// Reduce a `SHOW CREATE TABLE` statement to its comparable form.
///
/// Everything after the final `)` (engine, charset, collation, comment and
/// auto-increment options) is dropped, then the cosmetic charset/collation
/// tokens are stripped. Anything else, including whitespace and column
/// order, is kept, so textual differences count as drift.
///
/// ```
/// use mysql_ddl::normalize_create_statement;
///
/// let a = "CREATE TABLE `t` (\n  `name` varchar(10) COLLATE utf8mb4_unicode_ci NOT NULL\n) ENGINE=InnoDB AUTO_INCREMENT=9";
/// let b = "CREATE TABLE `t` (\n  `name` varchar(10) NOT NULL\n) ENGINE=InnoDB AUTO_INCREMENT=1";
/// assert_eq!(normalize_create_statement(a), normalize_create_statement(b));
/// ```
pub fn normalize_create_statement(statement: &str) -> String {
    let body = match statement.rfind(')') {
        Some(pos) => &statement[..=pos],
        None => "",
    };

    COSMETIC_TOKENS
        .iter()
        .fold(body.to_string(), |acc, token| acc.replace(token, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_options_are_ignored() {
        let remote = "CREATE TABLE `orders` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB AUTO_INCREMENT=12501 DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci";
        let local = "CREATE TABLE `orders` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=latin1";
        assert_eq!(
            normalize_create_statement(remote),
            normalize_create_statement(local)
        );
    }

    #[test]
    fn test_charset_and_collation_are_stripped() {
        let stmt = "CREATE TABLE `t` (\n  `a` text CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci NOT NULL\n)";
        assert_eq!(
            normalize_create_statement(stmt),
            "CREATE TABLE `t` (\n  `a` text NOT NULL\n)"
        );
    }

    #[test]
    fn test_type_change_is_visible() {
        let before = "CREATE TABLE `t` (\n  `a` int NOT NULL\n) ENGINE=InnoDB";
        let after = "CREATE TABLE `t` (\n  `a` bigint NOT NULL\n) ENGINE=InnoDB";
        assert_ne!(
            normalize_create_statement(before),
            normalize_create_statement(after)
        );
    }

    #[test]
    fn test_whitespace_difference_counts_as_drift() {
        let a = "CREATE TABLE `t` (\n  `a` int NOT NULL\n)";
        let b = "CREATE TABLE `t` (\n  `a`  int NOT NULL\n)";
        assert_ne!(normalize_create_statement(a), normalize_create_statement(b));
    }

    #[test]
    fn test_statement_without_parenthesis() {
        assert_eq!(normalize_create_statement("garbage"), "");
    }
}
