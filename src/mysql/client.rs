//! MySQL endpoints over `mysql_async`.

use async_trait::async_trait;
use mysql_async::{prelude::*, Conn, OptsBuilder, Pool, Row, Value};
use tracing::debug;

use super::query::{quote_identifier, render_count, render_select, render_upsert, upsert_batch_size};
use super::{
    ColumnInfo, Connector, Endpoint, FieldMap, Page, RowQuery, TableColumns, TimeZoneSettings,
};
use crate::connect::{ConnectionDescriptor, EndpointRole};
use crate::error::DbError;

/// Statements run on every new connection to the backup server, so tables
/// referencing each other can be created, truncated and dropped in any order.
const LOCAL_INIT: [&str; 1] = ["SET FOREIGN_KEY_CHECKS = 0"];

fn opts_for(descriptor: &ConnectionDescriptor, with_database: bool) -> OptsBuilder {
    let opts = OptsBuilder::default()
        .ip_or_hostname(descriptor.host.clone())
        .tcp_port(descriptor.port)
        .user(Some(descriptor.username.clone()))
        .pass(Some(descriptor.password.clone()))
        .prefer_socket(false);

    let opts = if with_database {
        opts.db_name(Some(descriptor.database.clone()))
    } else {
        opts
    };

    match descriptor.role {
        EndpointRole::Local => opts.init(LOCAL_INIT.to_vec()),
        EndpointRole::Remote => opts,
    }
}

/// Connects to real MySQL servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Endpoint>, DbError> {
        let pool = Pool::new(opts_for(descriptor, true));

        // The pool connects lazily; surface unknown-database and
        // authentication errors now.
        match pool.get_conn().await {
            Ok(conn) => drop(conn),
            Err(e) => {
                let _ = pool.disconnect().await;
                return Err(e.into());
            }
        }

        debug!("Connected to {}", descriptor);
        Ok(Box::new(MySqlEndpoint::new(pool, &descriptor.database)))
    }

    async fn create_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DbError> {
        let mut conn = Conn::new(opts_for(descriptor, false)).await?;
        conn.query_drop(format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_identifier(&descriptor.database)
        ))
        .await?;
        conn.disconnect().await?;
        Ok(())
    }
}

/// One database on a MySQL server.
pub struct MySqlEndpoint {
    pool: Pool,
    database: String,
}

impl MySqlEndpoint {
    pub fn new(pool: Pool, database: &str) -> Self {
        Self {
            pool,
            database: database.to_string(),
        }
    }

    async fn conn(&self) -> Result<Conn, DbError> {
        Ok(self.pool.get_conn().await?)
    }
}

fn row_to_field_map(mut row: Row) -> FieldMap {
    let columns = row.columns();
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value: Value = row.take(i).unwrap_or(Value::NULL);
            (column.name_str().into_owned(), value)
        })
        .collect()
}

#[async_trait]
impl Endpoint for MySqlEndpoint {
    fn database(&self) -> &str {
        &self.database
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let query = "
            SELECT TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        ";

        let mut conn = self.conn().await?;
        let tables: Vec<String> = conn.exec(query, (self.database.as_str(),)).await?;
        Ok(tables)
    }

    async fn show_create_table(&self, table: &str) -> Result<String, DbError> {
        let mut conn = self.conn().await?;
        let row: Option<(String, String)> = conn
            .query_first(format!("SHOW CREATE TABLE {}", quote_identifier(table)))
            .await?;
        row.map(|(_, statement)| statement)
            .ok_or_else(|| DbError::Other(format!("SHOW CREATE TABLE {table} returned nothing")))
    }

    async fn table_columns(&self, table: &str) -> Result<TableColumns, DbError> {
        let columns_query = "
            SELECT COLUMN_NAME, DATA_TYPE
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ?
            AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        ";
        let pk_query = "
            SELECT COLUMN_NAME
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
            AND TABLE_NAME = ?
            AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
        ";

        let mut conn = self.conn().await?;
        let columns: Vec<(String, String)> = conn
            .exec(columns_query, (self.database.as_str(), table))
            .await?;
        let primary: Vec<String> = conn.exec(pk_query, (self.database.as_str(), table)).await?;

        Ok(TableColumns::new(
            columns
                .into_iter()
                .map(|(name, data_type)| ColumnInfo {
                    is_primary: primary.contains(&name),
                    name,
                    data_type: data_type.to_lowercase(),
                })
                .collect(),
        ))
    }

    async fn count_rows(&self, query: &RowQuery) -> Result<u64, DbError> {
        let (sql, params) = render_count(query);
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn.exec_first(sql, params).await?;
        Ok(count.unwrap_or(0))
    }

    async fn fetch_rows(&self, query: &RowQuery, page: Page) -> Result<Vec<FieldMap>, DbError> {
        let (sql, params) = render_select(query, page);
        debug!("{}", sql);
        let mut conn = self.conn().await?;
        let rows: Vec<Row> = conn.exec(sql, params).await?;
        Ok(rows.into_iter().map(row_to_field_map).collect())
    }

    async fn upsert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[FieldMap],
    ) -> Result<(), DbError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        for batch in rows.chunks(upsert_batch_size(rows.len(), columns.len())) {
            let (sql, params) = render_upsert(table, columns, batch);
            conn.exec_drop(sql, params).await?;
        }
        Ok(())
    }

    async fn create_table(&self, create_statement: &str) -> Result<(), DbError> {
        let mut conn = self.conn().await?;
        conn.query_drop(create_statement).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<(), DbError> {
        let mut conn = self.conn().await?;
        conn.query_drop(format!("DROP TABLE IF EXISTS {}", quote_identifier(table)))
            .await?;
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<(), DbError> {
        let mut conn = self.conn().await?;
        conn.query_drop(format!("TRUNCATE TABLE {}", quote_identifier(table)))
            .await?;
        Ok(())
    }

    async fn time_zone(&self) -> Result<TimeZoneSettings, DbError> {
        let mut conn = self.conn().await?;
        let row: Option<(String, String)> = conn
            .query_first("SELECT @@global.time_zone, @@system_time_zone")
            .await?;
        let (global, system) =
            row.ok_or_else(|| DbError::Other("time zone query returned nothing".to_string()))?;
        Ok(TimeZoneSettings { global, system })
    }

    async fn disconnect(&self) -> Result<(), DbError> {
        self.pool.clone().disconnect().await?;
        Ok(())
    }
}
