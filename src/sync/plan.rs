use checkpoint::Cursor;
use std::fmt;

use crate::catalog::Table;
use crate::mysql::TableColumns;

/// The column incremental sync filters on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorDimension {
    /// `column >= watermark`, ordered by the column then the primary key,
    /// with rows lacking a timestamp first
    Timestamp { column: String, primary_key: String },
    /// `column > watermark`, ordered by the column
    PrimaryKey { column: String },
}

/// What one run does with one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPlan {
    Inactive,
    /// Truncate and copy everything in `order_by` order
    FullResync { order_by: Vec<String> },
    /// Truncate, then copy the whole table in cursor order
    Resync { dimension: CursorDimension },
    Incremental { dimension: CursorDimension },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Inactive,
    FullResync,
    Resync,
    IncrementalTimestamp,
    IncrementalPrimaryKey,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncMode::Inactive => "inactive",
            SyncMode::FullResync => "full resync",
            SyncMode::Resync => "resync",
            SyncMode::IncrementalTimestamp => "incremental by timestamp",
            SyncMode::IncrementalPrimaryKey => "incremental by primary key",
        };
        f.write_str(s)
    }
}

impl SyncPlan {
    pub fn decide(
        table: &Table,
        columns: &TableColumns,
        cursor: &Cursor,
        timestamp_column: &str,
    ) -> Self {
        if !table.is_active {
            return SyncPlan::Inactive;
        }

        let Some(primary_key) = columns.single_primary_key().filter(|_| !table.always_resync)
        else {
            let mut order_by: Vec<String> =
                columns.primary_key().iter().map(|c| c.name.clone()).collect();
            if order_by.is_empty() {
                order_by.extend(columns.first().map(|c| c.name.clone()));
            }
            return SyncPlan::FullResync { order_by };
        };

        let dimension = if columns.has(timestamp_column) && !table.always_primary_key {
            CursorDimension::Timestamp {
                column: timestamp_column.to_string(),
                primary_key: primary_key.name.clone(),
            }
        } else {
            CursorDimension::PrimaryKey {
                column: primary_key.name.clone(),
            }
        };

        if cursor.exists() {
            SyncPlan::Incremental { dimension }
        } else {
            SyncPlan::Resync { dimension }
        }
    }

    pub fn mode(&self) -> SyncMode {
        match self {
            SyncPlan::Inactive => SyncMode::Inactive,
            SyncPlan::FullResync { .. } => SyncMode::FullResync,
            SyncPlan::Resync { .. } => SyncMode::Resync,
            SyncPlan::Incremental {
                dimension: CursorDimension::Timestamp { .. },
            } => SyncMode::IncrementalTimestamp,
            SyncPlan::Incremental {
                dimension: CursorDimension::PrimaryKey { .. },
            } => SyncMode::IncrementalPrimaryKey,
        }
    }

    /// Whether the backup table is emptied before transfer.
    pub fn truncates(&self) -> bool {
        matches!(self, SyncPlan::FullResync { .. } | SyncPlan::Resync { .. })
    }
}
