//! Sync cursor (watermark) for one replicated table.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Watermark used for a table that has never been synced by timestamp.
pub const TIMESTAMP_SENTINEL: &str = "1900-01-01 00:00:01";

/// Watermark used for a table that has never been synced by primary key.
pub const PRIMARY_KEY_SENTINEL: &str = "0";

/// Format used when a timestamp watermark is rendered for MySQL or logs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The last position fully transferred for a table.
///
/// A table may be cursored by primary key, by timestamp, or both (the engine
/// always records both dimensions it can see, but only filters on one).
/// `None` means no page has ever been written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    #[default]
    None,
    PrimaryKey {
        last_id: String,
    },
    Timestamp {
        last_updated_at: NaiveDateTime,
    },
    Both {
        last_id: String,
        last_updated_at: NaiveDateTime,
    },
}

impl Cursor {
    /// Build a cursor from its nullable parts. Empty ids count as absent.
    pub fn from_parts(last_id: Option<String>, last_updated_at: Option<NaiveDateTime>) -> Self {
        let last_id = last_id.filter(|id| !id.is_empty());
        match (last_id, last_updated_at) {
            (None, None) => Cursor::None,
            (Some(last_id), None) => Cursor::PrimaryKey { last_id },
            (None, Some(last_updated_at)) => Cursor::Timestamp { last_updated_at },
            (Some(last_id), Some(last_updated_at)) => Cursor::Both {
                last_id,
                last_updated_at,
            },
        }
    }

    pub fn last_id(&self) -> Option<&str> {
        match self {
            Cursor::PrimaryKey { last_id } | Cursor::Both { last_id, .. } => Some(last_id),
            _ => None,
        }
    }

    pub fn last_updated_at(&self) -> Option<NaiveDateTime> {
        match self {
            Cursor::Timestamp { last_updated_at } | Cursor::Both { last_updated_at, .. } => {
                Some(*last_updated_at)
            }
            _ => None,
        }
    }

    /// True once at least one page has been recorded.
    pub fn exists(&self) -> bool {
        !matches!(self, Cursor::None)
    }

    /// Cursor after a page whose last row carried `last_id` / `last_updated_at`.
    ///
    /// The timestamp is replaced outright (a table without a timestamp column
    /// clears it), while a missing primary key keeps the previous id.
    pub fn advance(&self, last_id: Option<String>, last_updated_at: Option<NaiveDateTime>) -> Self {
        let last_id = last_id
            .filter(|id| !id.is_empty())
            .or_else(|| self.last_id().map(str::to_string));
        Cursor::from_parts(last_id, last_updated_at)
    }

    /// Timestamp watermark to filter on, falling back to the sentinel.
    pub fn timestamp_watermark(&self) -> NaiveDateTime {
        self.last_updated_at().unwrap_or_else(timestamp_sentinel)
    }

    /// Primary-key watermark to filter on, falling back to the sentinel.
    pub fn primary_key_watermark(&self) -> &str {
        self.last_id().unwrap_or(PRIMARY_KEY_SENTINEL)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::None => f.write_str("none"),
            Cursor::PrimaryKey { last_id } => write!(f, "last_id={last_id}"),
            Cursor::Timestamp { last_updated_at } => {
                write!(f, "last_updated_at={}", last_updated_at.format(TIMESTAMP_FORMAT))
            }
            Cursor::Both {
                last_id,
                last_updated_at,
            } => write!(
                f,
                "last_id={last_id} last_updated_at={}",
                last_updated_at.format(TIMESTAMP_FORMAT)
            ),
        }
    }
}

/// The fixed far-past epoch used as the initial timestamp watermark.
pub fn timestamp_sentinel() -> NaiveDateTime {
    NaiveDateTime::parse_from_str(TIMESTAMP_SENTINEL, "%Y-%m-%d %H:%M:%S")
        .unwrap_or(NaiveDateTime::MIN)
}
