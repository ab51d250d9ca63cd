//! Cursor storage trait and types
//!
//! This module defines the CursorStore trait for backend-agnostic
//! cursor storage operations, plus the persisted record shape.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Cursor;

/// Identifies the cursor of one table on one host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CursorKey {
    pub host_id: u64,
    pub database: String,
    pub table: String,
}

impl CursorKey {
    pub fn new(host_id: u64, database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            host_id,
            database: database.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for CursorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host_{}/{}/{}", self.host_id, self.database, self.table)
    }
}

/// Cursor data as it is stored in a backend.
///
/// Mirrors the nullable `last_id` / `last_updated_at` columns of a sync
/// state row so stored files stay readable by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCursor {
    pub host_id: u64,
    pub database: String,
    pub table: String,
    pub last_id: Option<String>,
    pub last_updated_at: Option<NaiveDateTime>,
    /// When this record was last written
    pub stored_at: DateTime<Utc>,
}

impl StoredCursor {
    pub fn new(key: &CursorKey, cursor: &Cursor) -> Self {
        Self {
            host_id: key.host_id,
            database: key.database.clone(),
            table: key.table.clone(),
            last_id: cursor.last_id().map(str::to_string),
            last_updated_at: cursor.last_updated_at(),
            stored_at: Utc::now(),
        }
    }

    pub fn key(&self) -> CursorKey {
        CursorKey::new(self.host_id, &self.database, &self.table)
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::from_parts(self.last_id.clone(), self.last_updated_at)
    }
}

/// Trait for cursor storage operations.
///
/// Implemented by:
/// - Filesystem storage (`FilesystemStore`)
/// - In-process storage (`MemoryStore`)
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Read the cursor for a table. Returns `Cursor::None` if none was stored.
    async fn read_cursor(&self, key: &CursorKey) -> Result<Cursor>;

    /// Persist the cursor for a table, replacing any previous value.
    async fn store_cursor(&self, key: &CursorKey, cursor: &Cursor) -> Result<()>;

    /// Delete the cursor for a table. Deleting a missing cursor is not an error.
    async fn delete_cursor(&self, key: &CursorKey) -> Result<()>;

    /// All stored cursors, sorted by key.
    async fn list_cursors(&self) -> Result<Vec<StoredCursor>>;
}
