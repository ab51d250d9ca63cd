use async_trait::async_trait;
use mysql_async::Value;
use mysql_ddl::{parse_create_table, TableStructure};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connect::ConnectionDescriptor;
use crate::error::{DbError, UNKNOWN_DATABASE_CODE};
use crate::mysql::{
    ColumnInfo, Connector, Endpoint, FieldMap, Filter, Page, RowQuery, TableColumns,
    TimeZoneSettings,
};

const TABLE_EXISTS_CODE: u16 = 1050;
const NO_SUCH_TABLE_CODE: u16 = 1146;
const UNKNOWN_COLUMN_CODE: u16 = 1054;

fn server_error(code: u16, message: String) -> DbError {
    DbError::Server { code, message }
}

struct MemoryTable {
    create_statement: String,
    structure: TableStructure,
    rows: Vec<FieldMap>,
    /// Primary-key values to row position
    index: HashMap<Vec<String>, usize>,
}

impl MemoryTable {
    fn new(create_statement: &str, structure: TableStructure) -> Self {
        Self {
            create_statement: create_statement.to_string(),
            structure,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn key_columns(&self) -> Vec<String> {
        self.structure
            .primary_key()
            .map(|pk| pk.columns.clone())
            .unwrap_or_default()
    }

    fn key_of(key: &[String], row: &FieldMap) -> Option<Vec<String>> {
        if key.is_empty() {
            return None;
        }
        Some(
            key.iter()
                .map(|k| row.get(k).unwrap_or(&Value::NULL).as_sql(false))
                .collect(),
        )
    }

    fn upsert(&mut self, row: FieldMap) {
        let key = self.key_columns();
        match Self::key_of(&key, &row) {
            Some(k) => match self.index.get(&k) {
                Some(&position) => self.rows[position] = row,
                None => {
                    self.index.insert(k, self.rows.len());
                    self.rows.push(row);
                }
            },
            None => self.rows.push(row),
        }
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.index.clear();
    }

    fn reindex(&mut self) {
        let key = self.key_columns();
        self.index = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| Self::key_of(&key, row).map(|k| (k, i)))
            .collect();
    }
}

struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    time_zone: TimeZoneSettings,
    read_failures: HashMap<String, DbError>,
    write_failures: HashMap<String, DbError>,
    /// Rows upserted into a table right after its next page read
    changes_after_fetch: HashMap<String, Vec<FieldMap>>,
    fetches: Vec<(RowQuery, Page)>,
    upserted_rows: usize,
    truncated: Vec<String>,
    disconnected: bool,
}

/// An in-memory database.
///
/// Clones share the same tables, so a test can keep a handle to a
/// database it gave to a connector.
#[derive(Clone)]
pub struct MemoryEndpoint {
    database: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEndpoint {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            state: Arc::new(Mutex::new(MemoryState {
                tables: BTreeMap::new(),
                time_zone: TimeZoneSettings {
                    global: "SYSTEM".to_string(),
                    system: "UTC".to_string(),
                },
                read_failures: HashMap::new(),
                write_failures: HashMap::new(),
                changes_after_fetch: HashMap::new(),
                fetches: Vec::new(),
                upserted_rows: 0,
                truncated: Vec::new(),
                disconnected: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Define a table from its creation statement.
    pub fn define_table(&self, create_statement: &str) -> Result<(), DbError> {
        let structure = parse_create_table(create_statement).map_err(DbError::Other)?;
        let mut state = self.lock();
        if state.tables.contains_key(&structure.name) {
            return Err(server_error(
                TABLE_EXISTS_CODE,
                format!("Table '{}' already exists", structure.name),
            ));
        }
        state.tables.insert(
            structure.name.clone(),
            MemoryTable::new(create_statement, structure),
        );
        Ok(())
    }

    /// Replace a table's definition keeping its rows, like `ALTER TABLE`.
    pub fn alter_table(&self, create_statement: &str) -> Result<(), DbError> {
        let structure = parse_create_table(create_statement).map_err(DbError::Other)?;
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(&structure.name)
            .ok_or_else(|| no_such_table(&structure.name))?;

        for row in &mut table.rows {
            row.retain(|column, _| structure.column(column).is_some());
        }
        table.create_statement = create_statement.to_string();
        table.structure = structure;
        table.reindex();
        Ok(())
    }

    pub fn insert_rows(&self, table: &str, rows: Vec<FieldMap>) -> Result<(), DbError> {
        let mut state = self.lock();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| no_such_table(table))?;
        for row in rows {
            target.upsert(row);
        }
        Ok(())
    }

    /// Rows of a table in storage order.
    pub fn rows(&self, table: &str) -> Vec<FieldMap> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn set_time_zone(&self, settings: TimeZoneSettings) {
        self.lock().time_zone = settings;
    }

    /// Make every page read from `table` fail with `error`.
    pub fn fail_reads(&self, table: &str, error: DbError) {
        self.lock().read_failures.insert(table.to_string(), error);
    }

    /// Make every write to `table` fail with `error`.
    pub fn fail_writes(&self, table: &str, error: DbError) {
        self.lock().write_failures.insert(table.to_string(), error);
    }

    /// Upsert `rows` into `table` once the next page read from it has
    /// been served, as a concurrent writer would.
    pub fn change_after_fetch(&self, table: &str, rows: Vec<FieldMap>) {
        self.lock()
            .changes_after_fetch
            .insert(table.to_string(), rows);
    }

    /// Page reads served so far.
    pub fn fetches(&self) -> Vec<(RowQuery, Page)> {
        self.lock().fetches.clone()
    }

    /// Rows written through upserts so far.
    pub fn upserted_rows(&self) -> usize {
        self.lock().upserted_rows
    }

    /// Tables truncated so far, in order.
    pub fn truncated(&self) -> Vec<String> {
        self.lock().truncated.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }

    /// Forget recorded reads, writes and truncations.
    pub fn reset_log(&self) {
        let mut state = self.lock();
        state.fetches.clear();
        state.upserted_rows = 0;
        state.truncated.clear();
    }
}

fn no_such_table(table: &str) -> DbError {
    server_error(NO_SUCH_TABLE_CODE, format!("Table '{table}' doesn't exist"))
}

fn date_parts(v: &Value) -> Option<(u16, u8, u8, u8, u8, u8, u32)> {
    match v {
        Value::Date(y, mo, d, h, mi, s, us) => Some((*y, *mo, *d, *h, *mi, *s, *us)),
        _ => None,
    }
}

/// SQL-like ordering with NULL first.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::NULL, Value::NULL) => Ordering::Equal,
        (Value::NULL, _) => Ordering::Less,
        (_, Value::NULL) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Int(x), Value::UInt(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::UInt(x), Value::Int(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Date(..), Value::Date(..)) => date_parts(a).cmp(&date_parts(b)),
        _ => a.as_sql(false).cmp(&b.as_sql(false)),
    }
}

fn matches_filter(row: &FieldMap, filter: &Option<Filter>) -> bool {
    let field = |column: &str| row.get(column).unwrap_or(&Value::NULL);
    match filter {
        None => true,
        Some(Filter::After { column, value }) => {
            *field(column) != Value::NULL
                && compare_values(field(column), value) == Ordering::Greater
        }
        Some(Filter::AtOrAfter { column, value }) => {
            *field(column) != Value::NULL
                && compare_values(field(column), value) != Ordering::Less
        }
        Some(Filter::Seek {
            column,
            value,
            key,
            key_value,
        }) => {
            let key_after = compare_values(field(key), key_value) == Ordering::Greater;
            match (field(column), value) {
                (Value::NULL, Value::NULL) => key_after,
                (_, Value::NULL) => true,
                (Value::NULL, _) => false,
                (current, value) => match compare_values(current, value) {
                    Ordering::Greater => true,
                    Ordering::Equal => key_after,
                    Ordering::Less => false,
                },
            }
        }
    }
}

fn base_type(column_type: &str) -> String {
    column_type
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn database(&self) -> &str {
        &self.database
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        Ok(self.lock().tables.keys().cloned().collect())
    }

    async fn show_create_table(&self, table: &str) -> Result<String, DbError> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.create_statement.clone())
            .ok_or_else(|| no_such_table(table))
    }

    async fn table_columns(&self, table: &str) -> Result<TableColumns, DbError> {
        let state = self.lock();
        let table = state.tables.get(table).ok_or_else(|| no_such_table(table))?;
        let key = table.key_columns();
        Ok(TableColumns::new(
            table
                .structure
                .columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name.clone(),
                    data_type: base_type(&c.column_type),
                    is_primary: key.contains(&c.name),
                })
                .collect(),
        ))
    }

    async fn count_rows(&self, query: &RowQuery) -> Result<u64, DbError> {
        let state = self.lock();
        if let Some(err) = state.read_failures.get(&query.table) {
            return Err(err.clone());
        }
        let table = state
            .tables
            .get(&query.table)
            .ok_or_else(|| no_such_table(&query.table))?;
        Ok(table
            .rows
            .iter()
            .filter(|r| matches_filter(r, &query.filter))
            .count() as u64)
    }

    async fn fetch_rows(&self, query: &RowQuery, page: Page) -> Result<Vec<FieldMap>, DbError> {
        let mut state = self.lock();
        state.fetches.push((query.clone(), page));
        if let Some(err) = state.read_failures.get(&query.table) {
            return Err(err.clone());
        }
        let table = state
            .tables
            .get(&query.table)
            .ok_or_else(|| no_such_table(&query.table))?;

        let mut rows: Vec<&FieldMap> = table
            .rows
            .iter()
            .filter(|r| matches_filter(r, &query.filter))
            .collect();
        rows.sort_by(|a, b| {
            query
                .order_by
                .iter()
                .map(|c| {
                    compare_values(
                        a.get(c).unwrap_or(&Value::NULL),
                        b.get(c).unwrap_or(&Value::NULL),
                    )
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let page_rows: Vec<FieldMap> = rows
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|row| {
                if query.columns.is_empty() {
                    row.clone()
                } else {
                    query
                        .columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::NULL)))
                        .collect()
                }
            })
            .collect();

        if let Some(changes) = state.changes_after_fetch.remove(&query.table) {
            if let Some(table) = state.tables.get_mut(&query.table) {
                for row in changes {
                    table.upsert(row);
                }
            }
        }
        Ok(page_rows)
    }

    async fn upsert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[FieldMap],
    ) -> Result<(), DbError> {
        let mut state = self.lock();
        if let Some(err) = state.write_failures.get(table) {
            return Err(err.clone());
        }
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| no_such_table(table))?;

        if let Some(unknown) = columns
            .iter()
            .find(|c| target.structure.column(c).is_none())
        {
            return Err(server_error(
                UNKNOWN_COLUMN_CODE,
                format!("Unknown column '{unknown}' in 'field list'"),
            ));
        }

        for row in rows {
            let projected: FieldMap = columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::NULL)))
                .collect();
            target.upsert(projected);
        }
        state.upserted_rows += rows.len();
        Ok(())
    }

    async fn create_table(&self, create_statement: &str) -> Result<(), DbError> {
        self.define_table(create_statement)
    }

    async fn drop_table(&self, table: &str) -> Result<(), DbError> {
        self.lock().tables.remove(table);
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<(), DbError> {
        let mut state = self.lock();
        if let Some(err) = state.write_failures.get(table) {
            return Err(err.clone());
        }
        state
            .tables
            .get_mut(table)
            .ok_or_else(|| no_such_table(table))?
            .clear();
        state.truncated.push(table.to_string());
        Ok(())
    }

    async fn time_zone(&self) -> Result<TimeZoneSettings, DbError> {
        Ok(self.lock().time_zone.clone())
    }

    async fn disconnect(&self) -> Result<(), DbError> {
        self.lock().disconnected = true;
        Ok(())
    }
}

/// In-memory servers, addressed as `host:port/database`.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    databases: Arc<Mutex<HashMap<String, MemoryEndpoint>>>,
    connections: Arc<Mutex<Vec<ConnectionDescriptor>>>,
}

fn address(host: &str, port: u16, database: &str) -> String {
    format!("{host}:{port}/{database}")
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn databases(&self) -> MutexGuard<'_, HashMap<String, MemoryEndpoint>> {
        self.databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serve `endpoint` as database `endpoint.database()` on `host:port`.
    pub fn add_database(&self, host: &str, port: u16, endpoint: MemoryEndpoint) {
        self.databases()
            .insert(address(host, port, endpoint.database()), endpoint);
    }

    pub fn database(&self, host: &str, port: u16, database: &str) -> Option<MemoryEndpoint> {
        self.databases()
            .get(&address(host, port, database))
            .cloned()
    }

    /// Every successful connection, in order.
    pub fn connections(&self) -> Vec<ConnectionDescriptor> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Endpoint>, DbError> {
        let endpoint = self
            .database(&descriptor.host, descriptor.port, &descriptor.database)
            .ok_or_else(|| {
                server_error(
                    UNKNOWN_DATABASE_CODE,
                    format!("Unknown database '{}'", descriptor.database),
                )
            })?;
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(descriptor.clone());
        Ok(Box::new(endpoint))
    }

    async fn create_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DbError> {
        self.databases()
            .entry(address(
                &descriptor.host,
                descriptor.port,
                &descriptor.database,
            ))
            .or_insert_with(|| MemoryEndpoint::new(&descriptor.database));
        Ok(())
    }
}
