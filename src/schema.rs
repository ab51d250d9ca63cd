//! Schema reconciliation between a remote database and its backup.
//!
//! Per database the reconciler lists both sides, splits the table names into
//! tables to create, to remove and to check, compares the normalised
//! creation statements of the tables present on both sides, and turns every
//! drifted table into a drop plus a create. Removes are applied before
//! creates so a drifted table is recreated from the remote definition.
//!
//! No column-level `ALTER` is attempted. Drifted tables are parsed with
//! [`mysql_ddl::parse_create_table`] only to log which columns changed.

use std::collections::BTreeSet;

use checkpoint::CursorKey;
use mysql_ddl::{normalize_create_statement, parse_create_table};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, TableSelection};
use crate::error::{DbError, SchemaError};
use crate::mysql::Endpoint;

/// Table names of one database, split by where they exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSets {
    /// Remote only
    pub to_create: BTreeSet<String>,
    /// Local only
    pub to_remove: BTreeSet<String>,
    /// Present on both sides
    pub to_check: BTreeSet<String>,
    /// The filtered remote listing, sorted
    pub canonical: Vec<String>,
}

impl TableSets {
    pub fn diff(remote: Vec<String>, local: Vec<String>, selection: &TableSelection) -> Self {
        let remote: BTreeSet<String> = selection.filter(remote).into_iter().collect();
        let local: BTreeSet<String> = selection.filter(local).into_iter().collect();

        Self {
            to_create: remote.difference(&local).cloned().collect(),
            to_remove: local.difference(&remote).cloned().collect(),
            to_check: remote.intersection(&local).cloned().collect(),
            canonical: remote.into_iter().collect(),
        }
    }

    /// Schedule a drifted table for drop and recreate.
    pub fn mark_drifted(&mut self, table: &str) {
        self.to_remove.insert(table.to_string());
        self.to_create.insert(table.to_string());
    }
}

/// What reconciliation did to one database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tables to sync, sorted
    pub tables: Vec<String>,
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub drifted: Vec<String>,
}

pub struct SchemaReconciler<'a> {
    remote: &'a dyn Endpoint,
    local: &'a dyn Endpoint,
    catalog: &'a dyn Catalog,
    host_id: u64,
    /// Catalog name of the database (the remote name)
    database: &'a str,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(
        remote: &'a dyn Endpoint,
        local: &'a dyn Endpoint,
        catalog: &'a dyn Catalog,
        host_id: u64,
        database: &'a str,
    ) -> Self {
        Self {
            remote,
            local,
            catalog,
            host_id,
            database,
        }
    }

    pub async fn table_sets(&self, selection: &TableSelection) -> Result<TableSets, DbError> {
        let remote = self.remote.list_tables().await?;
        let local = self.local.list_tables().await?;
        Ok(TableSets::diff(remote, local, selection))
    }

    /// Whether the table's normalised definition differs between the sides.
    pub async fn check_structure(&self, table: &str) -> Result<bool, DbError> {
        let remote = self.remote.show_create_table(table).await?;
        let local = self.local.show_create_table(table).await?;

        if normalize_create_statement(&remote) == normalize_create_statement(&local) {
            return Ok(false);
        }

        match (parse_create_table(&remote), parse_create_table(&local)) {
            (Ok(remote), Ok(local)) => {
                let changed = local.changed_columns(&remote);
                if changed.is_empty() {
                    info!("Table {} drifted outside its columns", table);
                } else {
                    info!("Table {} drifted, changed columns: {:?}", table, changed);
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Skipping structural analysis of {}: {}", table, e);
            }
        }
        Ok(true)
    }

    fn cursor_key(&self, table: &str) -> CursorKey {
        CursorKey::new(self.host_id, self.database, table)
    }

    /// Drop each table locally and forget its cursor and registration.
    pub async fn apply_removes(&self, tables: &BTreeSet<String>) -> Result<(), SchemaError> {
        for table in tables {
            self.local
                .drop_table(table)
                .await
                .map_err(|source| SchemaError::Table {
                    table: table.clone(),
                    source,
                })?;
            self.catalog
                .delete_cursor(&self.cursor_key(table))
                .await
                .map_err(SchemaError::Catalog)?;
            self.catalog
                .delete_table(self.host_id, self.database, table)
                .await
                .map_err(SchemaError::Catalog)?;
            debug!("Dropped local table {}", table);
        }
        Ok(())
    }

    /// Copy each remote creation statement to the backup and register the table.
    pub async fn apply_creates(&self, tables: &BTreeSet<String>) -> Result<(), SchemaError> {
        for table in tables {
            let to_schema_error = |source: DbError| SchemaError::Table {
                table: table.clone(),
                source,
            };
            let statement = self
                .remote
                .show_create_table(table)
                .await
                .map_err(to_schema_error)?;
            self.local
                .create_table(&statement)
                .await
                .map_err(to_schema_error)?;
            self.catalog
                .register_table(self.host_id, self.database, table)
                .await
                .map_err(SchemaError::Catalog)?;
            debug!("Created local table {}", table);
        }
        Ok(())
    }

    /// Bring the backup's tables in line with the remote.
    pub async fn reconcile(&self, selection: &TableSelection) -> Result<ReconcileReport, SchemaError> {
        let mut sets = self.table_sets(selection).await?;

        let mut drifted = Vec::new();
        for table in &sets.to_check {
            let changed = self
                .check_structure(table)
                .await
                .map_err(|source| SchemaError::Table {
                    table: table.clone(),
                    source,
                })?;
            if changed {
                drifted.push(table.clone());
            }
        }
        for table in &drifted {
            sets.mark_drifted(table);
        }

        if !drifted.is_empty() {
            info!("Drifted tables: {}", drifted.join(", "));
        }
        if !sets.to_remove.is_empty() {
            info!(
                "Dropping tables: {}",
                sets.to_remove.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        if !sets.to_create.is_empty() {
            info!(
                "Creating tables: {}",
                sets.to_create.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        self.apply_removes(&sets.to_remove).await?;
        self.apply_creates(&sets.to_create).await?;

        Ok(ReconcileReport {
            tables: sets.canonical,
            created: sets.to_create.into_iter().collect(),
            removed: sets.to_remove.into_iter().collect(),
            drifted,
        })
    }
}
