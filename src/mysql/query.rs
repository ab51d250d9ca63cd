//! SQL rendering for [`RowQuery`] selections and upserts.

use mysql_async::Value;

use super::{FieldMap, Filter, Page, RowQuery};

/// Placeholder limit of a single prepared statement.
const MAX_PLACEHOLDERS: usize = 65_535;

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(filter: &Option<Filter>) -> (String, Vec<Value>) {
    match filter {
        None => (String::new(), Vec::new()),
        Some(Filter::After { column, value }) => (
            format!(" WHERE {} > ?", quote_identifier(column)),
            vec![value.clone()],
        ),
        Some(Filter::AtOrAfter { column, value }) => (
            format!(" WHERE {} >= ?", quote_identifier(column)),
            vec![value.clone()],
        ),
        Some(Filter::Seek {
            column,
            value: Value::NULL,
            key,
            key_value,
        }) => {
            let (column, key) = (quote_identifier(column), quote_identifier(key));
            (
                format!(" WHERE (({column} IS NULL AND {key} > ?) OR {column} IS NOT NULL)"),
                vec![key_value.clone()],
            )
        }
        Some(Filter::Seek {
            column,
            value,
            key,
            key_value,
        }) => {
            let (column, key) = (quote_identifier(column), quote_identifier(key));
            (
                format!(" WHERE ({column} > ? OR ({column} = ? AND {key} > ?))"),
                vec![value.clone(), value.clone(), key_value.clone()],
            )
        }
    }
}

pub fn render_count(query: &RowQuery) -> (String, Vec<Value>) {
    let (clause, params) = where_clause(&query.filter);
    (
        format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_identifier(&query.table),
            clause
        ),
        params,
    )
}

pub fn render_select(query: &RowQuery, page: Page) -> (String, Vec<Value>) {
    let (clause, params) = where_clause(&query.filter);
    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        column_list(&query.columns)
    };

    let mut sql = format!(
        "SELECT {} FROM {}{}",
        columns,
        quote_identifier(&query.table),
        clause
    );
    if !query.order_by.is_empty() {
        let order = query
            .order_by
            .iter()
            .map(|c| format!("{} ASC", quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {order}"));
    }
    sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset));
    (sql, params)
}

/// Rows per upsert statement given the requested chunk size, capped so the
/// statement stays within the placeholder limit.
pub fn upsert_batch_size(requested: usize, column_count: usize) -> usize {
    let cap = MAX_PLACEHOLDERS / column_count.max(1);
    requested.clamp(1, cap.max(1))
}

/// `INSERT ... ON DUPLICATE KEY UPDATE` over every column.
pub fn render_upsert(table: &str, columns: &[String], rows: &[FieldMap]) -> (String, Vec<Value>) {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders.as_str(); rows.len()].join(", ");
    let updates = columns
        .iter()
        .map(|c| {
            let quoted = quote_identifier(c);
            format!("{quoted} = VALUES({quoted})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
        quote_identifier(table),
        column_list(columns),
        values,
        updates
    );

    let params = rows
        .iter()
        .flat_map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::NULL))
        })
        .collect();

    (sql, params)
}
