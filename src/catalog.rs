//! Catalog store: hosts, databases, table registrations and cursors.
//!
//! Hosts, databases and global settings come from the catalog file and are
//! read-only to the engine. Table registrations and cursors are written by
//! the engine as it discovers and syncs tables.

mod model;
mod store;

pub use model::{
    CatalogError, CatalogFile, Database, GlobalConfig, Host, SshAuth, SshEndpoint, Table,
    TableSelection, ALL_TABLES,
};
pub use store::CatalogStore;

use anyhow::Result;
use async_trait::async_trait;
use checkpoint::{Cursor, CursorKey, StoredCursor};

/// CRUD over the catalog entities, as consumed by the engine.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn hosts(&self) -> Result<Vec<Host>>;

    async fn global_config(&self) -> Result<GlobalConfig>;

    async fn find_table(&self, host_id: u64, database: &str, table: &str)
        -> Result<Option<Table>>;

    /// Find the table, registering it with the global policy lists applied
    /// if it is not registered yet.
    async fn register_table(&self, host_id: u64, database: &str, table: &str) -> Result<Table>;

    async fn delete_table(&self, host_id: u64, database: &str, table: &str) -> Result<()>;

    async fn tables(&self) -> Result<Vec<Table>>;

    async fn read_cursor(&self, key: &CursorKey) -> Result<Cursor>;

    async fn store_cursor(&self, key: &CursorKey, cursor: &Cursor) -> Result<()>;

    async fn delete_cursor(&self, key: &CursorKey) -> Result<()>;

    async fn list_cursors(&self) -> Result<Vec<StoredCursor>>;
}
