//! Filesystem-based cursor storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::store::{CursorKey, CursorStore, StoredCursor};
use crate::Cursor;

/// Filesystem implementation of CursorStore trait.
///
/// Stores one JSON file per table under
/// `<dir>/host_<id>/<database>/<table>.json`. Writes go through a temporary
/// file and a rename so a crash never leaves a half-written cursor behind.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, key: &CursorKey) -> PathBuf {
        self.dir
            .join(format!("host_{}", key.host_id))
            .join(&key.database)
            .join(format!("{}.json", key.table))
    }
}

#[async_trait]
impl CursorStore for FilesystemStore {
    async fn read_cursor(&self, key: &CursorKey) -> Result<Cursor> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(Cursor::None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cursor file {}", path.display()))?;
        let stored: StoredCursor = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cursor file {}", path.display()))?;
        Ok(stored.cursor())
    }

    async fn store_cursor(&self, key: &CursorKey, cursor: &Cursor) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stored = StoredCursor::new(key, cursor);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&stored)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!("Stored cursor {} at {}: {}", key, path.display(), cursor);
        Ok(())
    }

    async fn delete_cursor(&self, key: &CursorKey) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted cursor {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_cursors(&self) -> Result<Vec<StoredCursor>> {
        let mut cursors = Vec::new();
        if self.dir.exists() {
            collect_cursor_files(&self.dir, &mut cursors)?;
        }
        cursors.sort_by_key(|c| c.key());
        Ok(cursors)
    }
}

fn collect_cursor_files(dir: &Path, out: &mut Vec<StoredCursor>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_cursor_files(&path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            let content = std::fs::read_to_string(&path)?;
            out.push(serde_json::from_str(&content)?);
        }
    }
    Ok(())
}
