//! MySQL endpoint abstraction.
//!
//! The schema reconciler and the sync engine talk to both sides of a
//! backup through [`Endpoint`]. [`client::MySqlEndpoint`] implements it over
//! a `mysql_async` pool; `crate::testing::MemoryEndpoint` implements it in
//! memory.
//!
//! Row selection is described structurally by [`RowQuery`] and [`Page`] and
//! rendered to SQL by the [`query`] module, so an endpoint never receives
//! free-form SQL fragments.

pub mod client;
pub mod query;

use async_trait::async_trait;
use mysql_async::Value;
use std::collections::HashMap;

use crate::connect::ConnectionDescriptor;
use crate::error::DbError;

pub use client::{MySqlConnector, MySqlEndpoint};

/// One row as column name to value.
pub type FieldMap = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Lower-case base type, e.g. `int` or `varchar`
    pub data_type: String,
    pub is_primary: bool,
}

impl ColumnInfo {
    pub fn is_integer(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
        )
    }
}

/// Columns of a table in ordinal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns {
    pub columns: Vec<ColumnInfo>,
}

impl TableColumns {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The primary key column when the key is exactly one column.
    pub fn single_primary_key(&self) -> Option<&ColumnInfo> {
        let mut keys = self.columns.iter().filter(|c| c.is_primary);
        match (keys.next(), keys.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }

    pub fn primary_key(&self) -> Vec<&ColumnInfo> {
        self.columns.iter().filter(|c| c.is_primary).collect()
    }

    pub fn first(&self) -> Option<&ColumnInfo> {
        self.columns.first()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column > value`
    After { column: String, value: Value },
    /// `column >= value`
    AtOrAfter { column: String, value: Value },
    /// Rows past `(value, key_value)` in `column, key` order, NULL first.
    ///
    /// With a NULL `value` this admits the NULL rows whose key is past
    /// `key_value` and every non-NULL row.
    Seek {
        column: String,
        value: Value,
        key: String,
        key_value: Value,
    },
}

/// A selection of rows from one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Option<Filter>,
    /// Ascending sort keys
    pub order_by: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

/// `@@global.time_zone` and `@@system_time_zone` of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeZoneSettings {
    pub global: String,
    pub system: String,
}

/// One database on one server.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Name of the database this endpoint is bound to.
    fn database(&self) -> &str;

    /// Base tables, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>, DbError>;

    /// The `SHOW CREATE TABLE` statement.
    async fn show_create_table(&self, table: &str) -> Result<String, DbError>;

    async fn table_columns(&self, table: &str) -> Result<TableColumns, DbError>;

    async fn count_rows(&self, query: &RowQuery) -> Result<u64, DbError>;

    async fn fetch_rows(&self, query: &RowQuery, page: Page) -> Result<Vec<FieldMap>, DbError>;

    /// Insert rows, overwriting rows whose key already exists. Missing
    /// columns are written as NULL.
    async fn upsert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[FieldMap],
    ) -> Result<(), DbError>;

    /// Execute a creation statement as given.
    async fn create_table(&self, create_statement: &str) -> Result<(), DbError>;

    async fn drop_table(&self, table: &str) -> Result<(), DbError>;

    async fn truncate_table(&self, table: &str) -> Result<(), DbError>;

    async fn time_zone(&self) -> Result<TimeZoneSettings, DbError>;

    /// Release the underlying connections.
    async fn disconnect(&self) -> Result<(), DbError>;
}

/// Opens endpoints from connection descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ConnectionDescriptor)
        -> Result<Box<dyn Endpoint>, DbError>;

    /// `CREATE DATABASE IF NOT EXISTS` for the descriptor's database.
    async fn create_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DbError>;
}
