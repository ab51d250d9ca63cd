//! The catalog backed by a TOML catalog file plus a state directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use checkpoint::{Cursor, CursorKey, CursorStore, FilesystemStore, MemoryStore, StoredCursor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{Catalog, CatalogFile, GlobalConfig, Host, Table};

type TableKey = (u64, String, String);

/// Catalog implementation.
///
/// Table registrations live in `<state_dir>/tables.json` and cursors in
/// `<state_dir>/cursors/`. The in-memory variant keeps both in process.
pub struct CatalogStore {
    file: CatalogFile,
    tables: Mutex<BTreeMap<TableKey, Table>>,
    tables_path: Option<PathBuf>,
    cursors: Box<dyn CursorStore>,
}

impl CatalogStore {
    /// Open a catalog persisted under `state_dir`, creating it if needed.
    pub fn open(file: CatalogFile, state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;

        let tables_path = state_dir.join("tables.json");
        let tables = if tables_path.exists() {
            let content = std::fs::read_to_string(&tables_path)
                .with_context(|| format!("Failed to read {}", tables_path.display()))?;
            let list: Vec<Table> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", tables_path.display()))?;
            list.into_iter().map(|t| (key_of(&t), t)).collect()
        } else {
            BTreeMap::new()
        };

        info!(
            "Opened catalog with {} hosts and {} registered tables at {}",
            file.hosts.len(),
            tables.len(),
            state_dir.display()
        );

        Ok(Self {
            file,
            tables: Mutex::new(tables),
            tables_path: Some(tables_path),
            cursors: Box::new(FilesystemStore::new(state_dir.join("cursors"))),
        })
    }

    pub fn in_memory(file: CatalogFile) -> Self {
        Self {
            file,
            tables: Mutex::new(BTreeMap::new()),
            tables_path: None,
            cursors: Box::new(MemoryStore::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TableKey, Table>> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, tables: &BTreeMap<TableKey, Table>) -> Result<()> {
        let Some(path) = &self.tables_path else {
            return Ok(());
        };
        let list: Vec<&Table> = tables.values().collect();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&list)?)?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

fn key_of(table: &Table) -> TableKey {
    (table.host_id, table.database.clone(), table.name.clone())
}

fn key(host_id: u64, database: &str, table: &str) -> TableKey {
    (host_id, database.to_string(), table.to_string())
}

#[async_trait]
impl Catalog for CatalogStore {
    async fn hosts(&self) -> Result<Vec<Host>> {
        Ok(self.file.hosts.clone())
    }

    async fn global_config(&self) -> Result<GlobalConfig> {
        Ok(self.file.settings.clone())
    }

    async fn find_table(
        &self,
        host_id: u64,
        database: &str,
        table: &str,
    ) -> Result<Option<Table>> {
        Ok(self.lock().get(&key(host_id, database, table)).cloned())
    }

    async fn register_table(&self, host_id: u64, database: &str, table: &str) -> Result<Table> {
        let mut tables = self.lock();
        if let Some(existing) = tables.get(&key(host_id, database, table)) {
            return Ok(existing.clone());
        }

        let registered = Table::register(host_id, database, table, &self.file.settings);
        debug!("Registering table {}/{}: {:?}", database, table, registered);
        tables.insert(key_of(&registered), registered.clone());
        self.persist(&tables)?;
        Ok(registered)
    }

    async fn delete_table(&self, host_id: u64, database: &str, table: &str) -> Result<()> {
        let mut tables = self.lock();
        if tables.remove(&key(host_id, database, table)).is_some() {
            self.persist(&tables)?;
        }
        Ok(())
    }

    async fn tables(&self) -> Result<Vec<Table>> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn read_cursor(&self, key: &CursorKey) -> Result<Cursor> {
        self.cursors.read_cursor(key).await
    }

    async fn store_cursor(&self, key: &CursorKey, cursor: &Cursor) -> Result<()> {
        self.cursors.store_cursor(key, cursor).await
    }

    async fn delete_cursor(&self, key: &CursorKey) -> Result<()> {
        self.cursors.delete_cursor(key).await
    }

    async fn list_cursors(&self) -> Result<Vec<StoredCursor>> {
        self.cursors.list_cursors().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file() -> CatalogFile {
        CatalogFile::from_toml(
            r#"
[settings]
always_primary_key_tables = ["ledger"]
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_is_find_or_create() {
        let catalog = CatalogStore::in_memory(file());
        assert!(catalog.find_table(1, "shop", "ledger").await.unwrap().is_none());

        let first = catalog.register_table(1, "shop", "ledger").await.unwrap();
        assert!(first.always_primary_key);

        // Later edits survive re-registration
        {
            let mut tables = catalog.lock();
            tables
                .get_mut(&key(1, "shop", "ledger"))
                .unwrap()
                .always_primary_key = false;
        }
        let again = catalog.register_table(1, "shop", "ledger").await.unwrap();
        assert!(!again.always_primary_key);
        assert_eq!(catalog.tables().await.unwrap().len(), 1);

        catalog.delete_table(1, "shop", "ledger").await.unwrap();
        assert!(catalog.tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registrations_and_cursors_persist() {
        let tmp = TempDir::new().unwrap();
        let cursor = Cursor::from_parts(Some("12500".into()), None);
        {
            let catalog = CatalogStore::open(file(), tmp.path()).unwrap();
            let table = catalog.register_table(7, "shop", "orders").await.unwrap();
            catalog
                .store_cursor(&table.cursor_key(), &cursor)
                .await
                .unwrap();
        }

        let reopened = CatalogStore::open(file(), tmp.path()).unwrap();
        let table = reopened
            .find_table(7, "shop", "orders")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reopened.read_cursor(&table.cursor_key()).await.unwrap(),
            cursor
        );
        assert_eq!(reopened.list_cursors().await.unwrap().len(), 1);
        assert!(tmp.path().join("cursors").join("host_7").exists());
    }
}
