use checkpoint::{Cursor, TIMESTAMP_FORMAT};
use mysql_async::Value;
use tracing::{debug, info};

use super::plan::{CursorDimension, SyncMode, SyncPlan};
use super::watermark::{cursor_id, primary_key_value, row_timestamp, timestamp_value};
use crate::catalog::{Catalog, GlobalConfig, Table};
use crate::error::{DbError, TransferError};
use crate::mysql::{Endpoint, Filter, Page, RowQuery, TableColumns};

/// Transfer settings taken from the global configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Rows per page read from the remote
    pub extract_chunk_size: usize,
    /// Rows per upsert statement on the backup
    pub apply_chunk_size: usize,
    pub timestamp_column: String,
}

impl From<&GlobalConfig> for EngineSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            extract_chunk_size: config.extract_chunk_size.max(1),
            apply_chunk_size: config.apply_chunk_size.max(1),
            timestamp_column: config.timestamp_column.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSyncReport {
    pub table: String,
    pub mode: SyncMode,
    /// Rows written to the backup
    pub rows: u64,
    /// Pages written to the backup
    pub pages: u64,
    /// Cursor persisted after the last page
    pub cursor: Cursor,
}

/// How successive pages are addressed.
enum Paging {
    /// Fixed filter, growing offset
    Offset,
    /// Filter on the primary key moved past each page, offset 0
    Keyset { column: String },
    /// Filter moved past the `(column, key)` pair of each page's last row,
    /// offset 0
    Seek { column: String, key: String },
}

pub struct SyncEngine<'a> {
    source: &'a dyn Endpoint,
    destination: &'a dyn Endpoint,
    catalog: &'a dyn Catalog,
    settings: EngineSettings,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        source: &'a dyn Endpoint,
        destination: &'a dyn Endpoint,
        catalog: &'a dyn Catalog,
        settings: EngineSettings,
    ) -> Self {
        Self {
            source,
            destination,
            catalog,
            settings,
        }
    }

    /// Bring one backup table up to date with its remote counterpart.
    pub async fn sync_table(&self, table: &Table) -> Result<TableSyncReport, TransferError> {
        let name = table.name.as_str();
        let key = table.cursor_key();
        let db_error = |e: DbError| TransferError::from_db(name, &e);

        let cursor = self
            .catalog
            .read_cursor(&key)
            .await
            .map_err(|e| TransferError::checkpoint(name, &e))?;
        let columns = self.destination.table_columns(name).await.map_err(db_error)?;

        let plan = SyncPlan::decide(table, &columns, &cursor, &self.settings.timestamp_column);
        let mode = plan.mode();
        let mut report = TableSyncReport {
            table: name.to_string(),
            mode,
            rows: 0,
            pages: 0,
            cursor: cursor.clone(),
        };
        if plan == SyncPlan::Inactive {
            debug!("Skipping inactive table {}", name);
            return Ok(report);
        }

        if plan.truncates() {
            self.destination.truncate_table(name).await.map_err(db_error)?;
        }
        // A resync starts over with no watermark.
        let mut cursor = if plan.truncates() { Cursor::None } else { cursor };

        let (mut query, paging) = self.build_query(name, &columns, &plan, &cursor);
        let total = self.source.count_rows(&query).await.map_err(db_error)?;
        let pages = total.div_ceil(self.settings.extract_chunk_size as u64);
        info!(
            table = %name,
            mode = %mode,
            rows = total,
            pages,
            cursor = %cursor,
            "Syncing table"
        );

        let timestamp_column = columns
            .has(&self.settings.timestamp_column)
            .then_some(self.settings.timestamp_column.as_str());
        let primary_key = columns.single_primary_key();
        let column_names = query.columns.clone();

        let mut offset = 0;
        loop {
            let page = Page {
                limit: self.settings.extract_chunk_size,
                offset,
            };
            let rows = self.source.fetch_rows(&query, page).await.map_err(db_error)?;
            let Some(last) = rows.last() else {
                break;
            };

            for chunk in rows.chunks(self.settings.apply_chunk_size) {
                self.destination
                    .upsert_rows(name, &column_names, chunk)
                    .await
                    .map_err(db_error)?;
            }

            let last_id = primary_key.and_then(|pk| last.get(&pk.name).and_then(cursor_id));
            let last_updated_at =
                timestamp_column.and_then(|ts| last.get(ts).and_then(row_timestamp));
            cursor = cursor.advance(last_id, last_updated_at);
            self.catalog
                .store_cursor(&key, &cursor)
                .await
                .map_err(|e| TransferError::checkpoint(name, &e))?;

            report.rows += rows.len() as u64;
            report.pages += 1;
            info!(
                table = %name,
                page = report.pages,
                pages,
                rows = report.rows,
                "Transferred page"
            );

            if rows.len() < self.settings.extract_chunk_size {
                break;
            }
            match (&paging, primary_key) {
                (Paging::Keyset { column }, Some(pk)) => {
                    query.filter = Some(Filter::After {
                        column: column.clone(),
                        value: primary_key_value(pk, cursor.primary_key_watermark()),
                    });
                }
                (Paging::Seek { column, key }, _) => {
                    let field = |c: &str| last.get(c).cloned().unwrap_or(Value::NULL);
                    query.filter = Some(Filter::Seek {
                        column: column.clone(),
                        value: field(column.as_str()),
                        key: key.clone(),
                        key_value: field(key.as_str()),
                    });
                }
                _ => offset += rows.len(),
            }
        }

        report.cursor = cursor;
        info!(
            table = %name,
            rows = report.rows,
            cursor = %report.cursor,
            "Table synced"
        );
        Ok(report)
    }

    fn build_query(
        &self,
        name: &str,
        columns: &TableColumns,
        plan: &SyncPlan,
        cursor: &Cursor,
    ) -> (RowQuery, Paging) {
        let mut query = RowQuery {
            table: name.to_string(),
            columns: columns.names(),
            filter: None,
            order_by: Vec::new(),
        };

        let (dimension, resync) = match plan {
            SyncPlan::FullResync { order_by } => {
                query.order_by = order_by.clone();
                return (query, Paging::Offset);
            }
            SyncPlan::Resync { dimension } => (dimension, true),
            SyncPlan::Incremental { dimension } => (dimension, false),
            SyncPlan::Inactive => return (query, Paging::Offset),
        };

        match dimension {
            CursorDimension::Timestamp {
                column,
                primary_key,
            } => {
                query.order_by = vec![column.clone(), primary_key.clone()];
                let paging = Paging::Seek {
                    column: column.clone(),
                    key: primary_key.clone(),
                };
                if resync {
                    debug!("Reading all of {} ordered by {}", name, column);
                    return (query, paging);
                }
                match cursor.last_updated_at() {
                    Some(watermark) => {
                        debug!(
                            "Filtering {} on {} >= {}",
                            name,
                            column,
                            watermark.format(TIMESTAMP_FORMAT)
                        );
                        query.filter = Some(Filter::AtOrAfter {
                            column: column.clone(),
                            value: timestamp_value(watermark),
                        });
                    }
                    // Interrupted while rows without a timestamp were copied.
                    None => {
                        let watermark = cursor.primary_key_watermark();
                        debug!(
                            "Resuming {} past rows with no {} up to {}",
                            name, column, watermark
                        );
                        query.filter = Some(Filter::Seek {
                            column: column.clone(),
                            value: Value::NULL,
                            key: primary_key.clone(),
                            key_value: columns
                                .get(primary_key)
                                .map(|pk| primary_key_value(pk, watermark))
                                .unwrap_or(Value::NULL),
                        });
                    }
                }
                (query, paging)
            }
            CursorDimension::PrimaryKey { column } => {
                let watermark = cursor.primary_key_watermark();
                debug!("Filtering {} on {} > {}", name, column, watermark);
                if let Some(info) = columns.get(column) {
                    query.filter = Some(Filter::After {
                        column: column.clone(),
                        value: primary_key_value(info, watermark),
                    });
                }
                query.order_by = vec![column.clone()];
                (
                    query,
                    Paging::Keyset {
                        column: column.clone(),
                    },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogFile, CatalogStore};
    use crate::error::TransferErrorKind;
    use crate::mysql::FieldMap;
    use crate::testing::MemoryEndpoint;
    use chrono::NaiveDateTime;
    use mysql_async::Value;

    const ITEMS: &str = "CREATE TABLE `items` (\n  `id` int NOT NULL,\n  `name` varchar(20) DEFAULT NULL,\n  `updated_at` datetime DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB";
    const TAGS: &str = "CREATE TABLE `tags` (\n  `id` int NOT NULL,\n  `label` varchar(20) DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB";

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn item(id: i64, updated_at: &str) -> FieldMap {
        FieldMap::from([
            ("id".to_string(), Value::Int(id)),
            ("name".to_string(), Value::Bytes(format!("item-{id}").into_bytes())),
            ("updated_at".to_string(), timestamp_value(ts(updated_at))),
        ])
    }

    fn tag(id: i64) -> FieldMap {
        FieldMap::from([
            ("id".to_string(), Value::Int(id)),
            ("label".to_string(), Value::Bytes(b"t".to_vec())),
        ])
    }

    fn settings(extract: usize, apply: usize) -> EngineSettings {
        EngineSettings {
            extract_chunk_size: extract,
            apply_chunk_size: apply,
            timestamp_column: "updated_at".into(),
        }
    }

    struct Fixture {
        remote: MemoryEndpoint,
        local: MemoryEndpoint,
        catalog: CatalogStore,
    }

    impl Fixture {
        fn new(ddl: &str) -> Self {
            let remote = MemoryEndpoint::new("shop");
            let local = MemoryEndpoint::new("backup_shop");
            remote.define_table(ddl).unwrap();
            local.define_table(ddl).unwrap();
            Self {
                remote,
                local,
                catalog: CatalogStore::in_memory(CatalogFile::default()),
            }
        }

        async fn table(&self, name: &str) -> Table {
            self.catalog.register_table(1, "shop", name).await.unwrap()
        }

        fn engine(&self, settings: EngineSettings) -> SyncEngine<'_> {
            SyncEngine::new(&self.remote, &self.local, &self.catalog, settings)
        }
    }

    #[tokio::test]
    async fn test_resync_by_primary_key_pages_with_keyset() {
        let fx = Fixture::new(TAGS);
        fx.remote
            .insert_rows("tags", (1..=7).map(tag).collect())
            .unwrap();
        let table = fx.table("tags").await;

        let report = fx.engine(settings(3, 2)).sync_table(&table).await.unwrap();
        assert_eq!(report.mode, SyncMode::Resync);
        assert_eq!(report.rows, 7);
        assert_eq!(report.pages, 3);
        assert_eq!(report.cursor, Cursor::from_parts(Some("7".into()), None));
        assert_eq!(fx.local.row_count("tags"), 7);
        assert_eq!(fx.local.truncated(), vec!["tags".to_string()]);

        let fetches = fx.remote.fetches();
        assert_eq!(fetches.len(), 3);
        assert!(fetches.iter().all(|(_, page)| page.offset == 0));
        assert_eq!(
            fetches[2].0.filter,
            Some(Filter::After {
                column: "id".into(),
                value: Value::Int(6)
            })
        );
        assert_eq!(
            fx.catalog.read_cursor(&table.cursor_key()).await.unwrap(),
            report.cursor
        );
    }

    #[tokio::test]
    async fn test_incremental_timestamp_is_inclusive() {
        let fx = Fixture::new(ITEMS);
        fx.remote
            .insert_rows(
                "items",
                vec![
                    item(1, "2024-01-01 10:00:00"),
                    item(2, "2024-01-02 10:00:00"),
                    item(3, "2024-01-03 10:00:00"),
                ],
            )
            .unwrap();
        let table = fx.table("items").await;
        fx.catalog
            .store_cursor(
                &table.cursor_key(),
                &Cursor::from_parts(Some("2".into()), Some(ts("2024-01-02 10:00:00"))),
            )
            .await
            .unwrap();

        let report = fx.engine(settings(100, 100)).sync_table(&table).await.unwrap();
        assert_eq!(report.mode, SyncMode::IncrementalTimestamp);
        assert_eq!(report.rows, 2, "the row at the watermark is re-read");
        assert!(fx.local.truncated().is_empty());
        assert_eq!(
            report.cursor,
            Cursor::from_parts(Some("3".into()), Some(ts("2024-01-03 10:00:00")))
        );
        let (query, _) = &fx.remote.fetches()[0];
        assert_eq!(query.order_by, vec!["updated_at".to_string(), "id".to_string()]);
    }

    #[tokio::test]
    async fn test_timestamp_paging_seeks_past_last_row() {
        let fx = Fixture::new(ITEMS);
        fx.remote
            .insert_rows(
                "items",
                (1..=5).map(|i| item(i, "2024-03-01 00:00:00")).collect(),
            )
            .unwrap();
        let table = fx.table("items").await;

        let report = fx.engine(settings(2, 10)).sync_table(&table).await.unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(fx.local.row_count("items"), 5);

        let fetches = fx.remote.fetches();
        assert!(fetches.iter().all(|(_, page)| page.offset == 0));
        assert_eq!(fetches[0].0.filter, None);
        assert_eq!(
            fetches[2].0.filter,
            Some(Filter::Seek {
                column: "updated_at".into(),
                value: timestamp_value(ts("2024-03-01 00:00:00")),
                key: "id".into(),
                key_value: Value::Int(4),
            })
        );
    }

    #[tokio::test]
    async fn test_resync_copies_rows_without_timestamp() {
        let fx = Fixture::new(ITEMS);
        let mut undated = item(2, "2024-01-01 00:00:00");
        undated.insert("updated_at".into(), Value::NULL);
        fx.remote
            .insert_rows("items", vec![item(1, "2024-05-01 12:00:00"), undated])
            .unwrap();
        let table = fx.table("items").await;

        let report = fx.engine(settings(100, 100)).sync_table(&table).await.unwrap();
        assert_eq!(report.mode, SyncMode::Resync);
        assert_eq!(report.rows, 2);
        assert_eq!(fx.local.row_count("items"), 2);
        assert_eq!(
            report.cursor,
            Cursor::from_parts(Some("1".into()), Some(ts("2024-05-01 12:00:00")))
        );

        let second = fx.engine(settings(100, 100)).sync_table(&table).await.unwrap();
        assert_eq!(second.mode, SyncMode::IncrementalTimestamp);
        assert_eq!(second.rows, 1);
        assert_eq!(fx.local.row_count("items"), 2);
    }

    #[tokio::test]
    async fn test_resumes_past_rows_without_timestamp() {
        let fx = Fixture::new(ITEMS);
        let undated = |id: i64| {
            let mut row = item(id, "2024-01-01 00:00:00");
            row.insert("updated_at".into(), Value::NULL);
            row
        };
        fx.remote
            .insert_rows(
                "items",
                vec![undated(1), undated(2), undated(3), item(4, "2024-02-01 00:00:00")],
            )
            .unwrap();
        let table = fx.table("items").await;
        // A previous run stopped after the page ending at row 2.
        fx.catalog
            .store_cursor(&table.cursor_key(), &Cursor::from_parts(Some("2".into()), None))
            .await
            .unwrap();

        let report = fx.engine(settings(100, 100)).sync_table(&table).await.unwrap();
        assert_eq!(report.mode, SyncMode::IncrementalTimestamp);
        assert_eq!(report.rows, 2);
        let ids: Vec<Value> = fx.local.rows("items").iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![Value::Int(3), Value::Int(4)]);
        assert_eq!(
            report.cursor,
            Cursor::from_parts(Some("4".into()), Some(ts("2024-02-01 00:00:00")))
        );
    }

    #[tokio::test]
    async fn test_inactive_table_is_untouched() {
        let fx = Fixture::new(TAGS);
        fx.remote.insert_rows("tags", vec![tag(1)]).unwrap();
        let mut table = fx.table("tags").await;
        table.is_active = false;

        let report = fx.engine(settings(10, 10)).sync_table(&table).await.unwrap();
        assert_eq!(report.mode, SyncMode::Inactive);
        assert!(fx.remote.fetches().is_empty());
        assert_eq!(fx.local.row_count("tags"), 0);
    }

    #[tokio::test]
    async fn test_empty_source_writes_no_cursor() {
        let fx = Fixture::new(TAGS);
        let table = fx.table("tags").await;

        let report = fx.engine(settings(10, 10)).sync_table(&table).await.unwrap();
        assert_eq!(report.pages, 0);
        assert_eq!(
            fx.catalog.read_cursor(&table.cursor_key()).await.unwrap(),
            Cursor::None
        );
    }

    #[tokio::test]
    async fn test_read_failure_is_classified() {
        let fx = Fixture::new(TAGS);
        fx.remote.fail_reads(
            "tags",
            DbError::Server {
                code: 1038,
                message: "Out of sort memory".into(),
            },
        );
        let table = fx.table("tags").await;

        let err = fx.engine(settings(10, 10)).sync_table(&table).await.unwrap_err();
        assert_eq!(err.table, "tags");
        assert_eq!(err.kind, TransferErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_previous_cursor() {
        let fx = Fixture::new(TAGS);
        fx.remote
            .insert_rows("tags", (1..=4).map(tag).collect())
            .unwrap();
        let table = fx.table("tags").await;
        let before = Cursor::from_parts(Some("1".into()), None);
        fx.catalog.store_cursor(&table.cursor_key(), &before).await.unwrap();
        fx.local.fail_writes(
            "tags",
            DbError::Connection("broken pipe".into()),
        );

        let err = fx.engine(settings(10, 10)).sync_table(&table).await.unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::ConnectionLost);
        assert_eq!(
            fx.catalog.read_cursor(&table.cursor_key()).await.unwrap(),
            before
        );
    }
}
