//! In-process cursor storage, used by tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::store::{CursorKey, CursorStore, StoredCursor};
use crate::Cursor;

/// CursorStore that keeps everything in a map.
#[derive(Default)]
pub struct MemoryStore {
    cursors: Mutex<BTreeMap<CursorKey, StoredCursor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<CursorKey, StoredCursor>> {
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn read_cursor(&self, key: &CursorKey) -> Result<Cursor> {
        Ok(self
            .lock()
            .get(key)
            .map(StoredCursor::cursor)
            .unwrap_or_default())
    }

    async fn store_cursor(&self, key: &CursorKey, cursor: &Cursor) -> Result<()> {
        self.lock()
            .insert(key.clone(), StoredCursor::new(key, cursor));
        Ok(())
    }

    async fn delete_cursor(&self, key: &CursorKey) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn list_cursors(&self) -> Result<Vec<StoredCursor>> {
        Ok(self.lock().values().cloned().collect())
    }
}
