//! Sync engine scenarios against in-memory endpoints.
//!
//! Each test wires a remote and a backup `MemoryEndpoint` through the
//! engine and checks rows, pages and the persisted cursor.

use backup_sync::catalog::{Catalog, CatalogFile, CatalogStore, GlobalConfig, Table};
use backup_sync::mysql::{Endpoint, FieldMap, Filter};
use backup_sync::sync::{timestamp_value, EngineSettings, SyncEngine, SyncMode};
use backup_sync::testing::MemoryEndpoint;
use checkpoint::{Cursor, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use mysql_async::Value;

const ORDERS: &str = "CREATE TABLE `orders` (\n  `id` bigint NOT NULL,\n  `total` int DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";
const PRICES: &str = "CREATE TABLE `prices` (\n  `sku` varchar(32) NOT NULL,\n  `amount` int DEFAULT NULL,\n  `updated_at` datetime DEFAULT NULL,\n  PRIMARY KEY (`sku`)\n) ENGINE=InnoDB";
const RATES: &str = "CREATE TABLE `rates` (\n  `id` int NOT NULL,\n  `rate` int DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB";

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
}

fn order(id: i64) -> FieldMap {
    FieldMap::from([
        ("id".to_string(), Value::Int(id)),
        ("total".to_string(), Value::Int(id * 10)),
    ])
}

fn price(sku: &str, amount: i64, updated_at: &str) -> FieldMap {
    FieldMap::from([
        ("sku".to_string(), Value::Bytes(sku.as_bytes().to_vec())),
        ("amount".to_string(), Value::Int(amount)),
        ("updated_at".to_string(), timestamp_value(ts(updated_at))),
    ])
}

fn rate(id: i64, value: i64) -> FieldMap {
    FieldMap::from([
        ("id".to_string(), Value::Int(id)),
        ("rate".to_string(), Value::Int(value)),
    ])
}

struct Setup {
    remote: MemoryEndpoint,
    local: MemoryEndpoint,
    catalog: CatalogStore,
    settings: EngineSettings,
}

impl Setup {
    fn new(ddl: &str, settings: GlobalConfig) -> Self {
        let remote = MemoryEndpoint::new("shop");
        let local = MemoryEndpoint::new("backup_db1_shop");
        remote.define_table(ddl).unwrap();
        local.define_table(ddl).unwrap();
        let engine_settings = EngineSettings::from(&settings);
        Self {
            remote,
            local,
            catalog: CatalogStore::in_memory(CatalogFile {
                settings,
                hosts: Vec::new(),
            }),
            settings: engine_settings,
        }
    }

    async fn table(&self, name: &str) -> Table {
        self.catalog.register_table(1, "shop", name).await.unwrap()
    }

    fn engine(&self) -> SyncEngine<'_> {
        SyncEngine::new(
            &self.remote,
            &self.local,
            &self.catalog,
            self.settings.clone(),
        )
    }
}

fn paged(extract: usize, apply: usize) -> GlobalConfig {
    GlobalConfig {
        extract_chunk_size: extract,
        apply_chunk_size: apply,
        ..GlobalConfig::default()
    }
}

#[tokio::test]
async fn test_orders_initial_copy_then_increment() {
    let setup = Setup::new(ORDERS, paged(500, 500));
    setup
        .remote
        .insert_rows("orders", (1..=12_500).map(order).collect())
        .unwrap();
    let table = setup.table("orders").await;

    let first = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(first.mode, SyncMode::Resync);
    assert_eq!(first.pages, 25);
    assert_eq!(first.rows, 12_500);
    assert_eq!(first.cursor.last_id(), Some("12500"));
    assert_eq!(setup.local.row_count("orders"), 12_500);

    setup
        .remote
        .insert_rows("orders", (12_501..=12_510).map(order).collect())
        .unwrap();
    setup.remote.reset_log();
    setup.local.reset_log();

    let second = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(second.mode, SyncMode::IncrementalPrimaryKey);
    assert_eq!(second.pages, 1);
    assert_eq!(second.rows, 10);
    assert_eq!(second.cursor.last_id(), Some("12510"));
    assert_eq!(setup.local.row_count("orders"), 12_510);
    assert!(setup.local.truncated().is_empty());
    assert_eq!(
        setup.remote.fetches()[0].0.filter,
        Some(Filter::After {
            column: "id".into(),
            value: Value::Int(12_500)
        })
    );
}

#[tokio::test]
async fn test_primary_key_cursor_skips_rows_at_or_below_it() {
    let setup = Setup::new(ORDERS, paged(100, 100));
    setup
        .remote
        .insert_rows("orders", (1..=20).map(order).collect())
        .unwrap();
    let table = setup.table("orders").await;
    setup
        .catalog
        .store_cursor(&table.cursor_key(), &Cursor::from_parts(Some("15".into()), None))
        .await
        .unwrap();

    let report = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(report.rows, 5);
    let ids: Vec<Value> = setup
        .local
        .rows("orders")
        .into_iter()
        .map(|r| r["id"].clone())
        .collect();
    assert_eq!(ids, (16..=20).map(Value::Int).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_timestamp_cursor_rereads_boundary_and_picks_up_updates() {
    let setup = Setup::new(PRICES, paged(100, 100));
    setup
        .remote
        .insert_rows(
            "prices",
            vec![
                price("A-1", 100, "2024-06-01 08:00:00"),
                price("B-2", 200, "2024-06-01 09:00:00"),
                price("C-3", 300, "2024-06-01 09:00:00"),
            ],
        )
        .unwrap();
    let table = setup.table("prices").await;

    let first = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(first.rows, 3);
    assert_eq!(
        first.cursor,
        Cursor::from_parts(Some("C-3".into()), Some(ts("2024-06-01 09:00:00")))
    );

    // Same timestamp as the watermark, plus a later update of an old row.
    setup
        .remote
        .insert_rows(
            "prices",
            vec![
                price("D-4", 400, "2024-06-01 09:00:00"),
                price("A-1", 150, "2024-06-02 10:00:00"),
            ],
        )
        .unwrap();

    let second = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(second.mode, SyncMode::IncrementalTimestamp);
    assert_eq!(second.rows, 4, "rows at the watermark are re-read");
    assert_eq!(second.cursor.last_updated_at(), Some(ts("2024-06-02 10:00:00")));
    assert_eq!(setup.local.row_count("prices"), 4);

    let a1 = setup
        .local
        .rows("prices")
        .into_iter()
        .find(|r| r["sku"] == Value::Bytes(b"A-1".to_vec()))
        .unwrap();
    assert_eq!(a1["amount"], Value::Int(150));
}

#[tokio::test]
async fn test_row_updated_between_pages_does_not_hide_later_rows() {
    let setup = Setup::new(PRICES, paged(2, 10));
    setup
        .remote
        .insert_rows(
            "prices",
            (1..=6)
                .map(|day| price(&format!("SKU-{day}"), day, &format!("2024-01-0{day} 00:00:00")))
                .collect(),
        )
        .unwrap();
    let table = setup.table("prices").await;

    // The first row is edited while the first page is being written.
    setup.remote.change_after_fetch(
        "prices",
        vec![price("SKU-1", 100, "2024-01-09 00:00:00")],
    );

    let first = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(first.mode, SyncMode::Resync);
    assert_eq!(
        first.cursor,
        Cursor::from_parts(Some("SKU-1".into()), Some(ts("2024-01-09 00:00:00")))
    );
    let mut skus: Vec<Value> = setup
        .local
        .rows("prices")
        .into_iter()
        .map(|r| r["sku"].clone())
        .collect();
    skus.sort_by(|a, b| a.as_sql(false).cmp(&b.as_sql(false)));
    assert_eq!(
        skus,
        (1..=6)
            .map(|day| Value::Bytes(format!("SKU-{day}").into_bytes()))
            .collect::<Vec<_>>()
    );

    let second = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(second.mode, SyncMode::IncrementalTimestamp);
    assert_eq!(second.rows, 1);
    assert_eq!(setup.local.row_count("prices"), 6);
    let sku1 = setup
        .local
        .rows("prices")
        .into_iter()
        .find(|r| r["sku"] == Value::Bytes(b"SKU-1".to_vec()))
        .unwrap();
    assert_eq!(sku1["amount"], Value::Int(100));
}

#[tokio::test]
async fn test_second_run_without_changes_is_idempotent() {
    let setup = Setup::new(PRICES, paged(2, 1));
    setup
        .remote
        .insert_rows(
            "prices",
            vec![
                price("A-1", 1, "2024-01-01 00:00:00"),
                price("B-2", 2, "2024-01-02 00:00:00"),
                price("C-3", 3, "2024-01-03 00:00:00"),
            ],
        )
        .unwrap();
    let table = setup.table("prices").await;

    let first = setup.engine().sync_table(&table).await.unwrap();
    let after_first = setup.local.rows("prices");
    let second = setup.engine().sync_table(&table).await.unwrap();

    assert_eq!(second.cursor, first.cursor);
    assert_eq!(setup.local.rows("prices"), after_first);
    assert_eq!(
        setup.catalog.read_cursor(&table.cursor_key()).await.unwrap(),
        first.cursor
    );
}

#[tokio::test]
async fn test_always_resync_copies_everything_each_run() {
    let setup = Setup::new(
        RATES,
        GlobalConfig {
            always_resync_tables: vec!["rates".into()],
            ..paged(10, 10)
        },
    );
    setup
        .remote
        .insert_rows("rates", (1..=3).map(|i| rate(i, 1)).collect())
        .unwrap();
    let table = setup.table("rates").await;
    assert!(table.always_resync);

    setup.engine().sync_table(&table).await.unwrap();

    // Rows deleted at the source disappear from the backup on the next run.
    setup.remote.drop_table("rates").await.unwrap();
    setup.remote.define_table(RATES).unwrap();
    setup
        .remote
        .insert_rows("rates", vec![rate(2, 5), rate(3, 5)])
        .unwrap();

    let report = setup.engine().sync_table(&table).await.unwrap();
    assert_eq!(report.mode, SyncMode::FullResync);
    assert_eq!(setup.local.truncated(), vec!["rates".to_string(); 2]);
    assert_eq!(setup.local.rows("rates").len(), 2);
    assert!(setup
        .local
        .rows("rates")
        .iter()
        .all(|r| r["rate"] == Value::Int(5)));
}

#[tokio::test]
async fn test_failed_page_leaves_cursor_at_last_written_page() {
    let setup = Setup::new(ORDERS, paged(5, 5));
    setup
        .remote
        .insert_rows("orders", (1..=12).map(order).collect())
        .unwrap();
    let table = setup.table("orders").await;
    setup.engine().sync_table(&table).await.unwrap();

    setup
        .remote
        .insert_rows("orders", (13..=20).map(order).collect())
        .unwrap();
    setup.local.fail_writes(
        "orders",
        backup_sync::error::DbError::Server {
            code: 1114,
            message: "The table 'orders' is full".into(),
        },
    );

    let err = tokio_test::assert_err!(setup.engine().sync_table(&table).await);
    assert_eq!(err.kind, backup_sync::error::TransferErrorKind::ResourceExhausted);
    let cursor = tokio_test::assert_ok!(setup.catalog.read_cursor(&table.cursor_key()).await);
    assert_eq!(cursor.last_id(), Some("12"));
}
