//! Drives a backup run: hosts, then databases, then tables.
//!
//! Failures are contained at the level they belong to. A configuration
//! error ends the current host, a failed table ends its database, and the
//! run always moves on to the next unit. Each database pass ends by
//! disconnecting both endpoints, and each host pass by closing its tunnel.

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, Database, GlobalConfig, Host};
use crate::connect::{
    ensure_local_database, local_descriptor, open_tunnel, remote_descriptor, verify_timezones,
    TunnelConfig, TunnelHandle,
};
use crate::error::{ConfigError, SchemaError, TransferError};
use crate::mysql::{Connector, Endpoint};
use crate::notify::Notifier;
use crate::schema::SchemaReconciler;
use crate::sync::{EngineSettings, SyncEngine, TableSyncReport};

/// Run-time narrowing of a backup run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only the host whose identity matches
    pub host: Option<String>,
    /// Only this database of the selected host
    pub database: Option<String>,
    pub skip_tz_check: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub hosts: Vec<HostReport>,
}

impl RunReport {
    /// True when any host or database failed.
    pub fn has_failures(&self) -> bool {
        self.hosts.iter().any(|h| {
            h.error.is_some()
                || h
                    .databases
                    .iter()
                    .any(|d| matches!(d.outcome, DatabaseOutcome::Failed { .. }))
        })
    }

    pub fn database(&self, identity: &str, name: &str) -> Option<&DatabaseReport> {
        self.hosts
            .iter()
            .filter(|h| h.identity == identity)
            .flat_map(|h| h.databases.iter())
            .find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub identity: String,
    /// The error that ended this host's pass early
    pub error: Option<String>,
    pub databases: Vec<DatabaseReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseReport {
    pub name: String,
    pub outcome: DatabaseOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseOutcome {
    Succeeded { tables: Vec<TableSyncReport> },
    /// `table` is set when a specific table failed
    Failed { table: Option<String>, error: String },
    Skipped { reason: String },
}

/// Why a database pass stopped early.
enum PassError {
    Host(ConfigError),
    Database { table: Option<String>, error: String },
}

impl From<ConfigError> for PassError {
    fn from(err: ConfigError) -> Self {
        PassError::Host(err)
    }
}

impl From<SchemaError> for PassError {
    fn from(err: SchemaError) -> Self {
        let table = match &err {
            SchemaError::Table { table, .. } => Some(table.clone()),
            _ => None,
        };
        PassError::Database {
            table,
            error: err.to_string(),
        }
    }
}

impl From<TransferError> for PassError {
    fn from(err: TransferError) -> Self {
        if let Some(hint) = err.kind.operator_hint() {
            warn!("Table {}: {}", err.table, hint);
        }
        PassError::Database {
            table: Some(err.table.clone()),
            error: err.to_string(),
        }
    }
}

pub struct Orchestrator<'a> {
    catalog: &'a dyn Catalog,
    connector: &'a dyn Connector,
    notifier: &'a dyn Notifier,
    tunnel_config: TunnelConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        connector: &'a dyn Connector,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            catalog,
            connector,
            notifier,
            tunnel_config: TunnelConfig::default(),
        }
    }

    pub fn with_tunnel_config(mut self, config: TunnelConfig) -> Self {
        self.tunnel_config = config;
        self
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let config = self.catalog.global_config().await?;
        let hosts = self.catalog.hosts().await?;
        let mut report = RunReport::default();

        for host in hosts.iter().filter(|h| h.is_active) {
            if let Some(wanted) = &options.host {
                if host.identity() != wanted {
                    continue;
                }
            }

            let databases: Vec<&Database> = host
                .active_databases()
                .filter(|d| options.database.as_ref().map_or(true, |name| &d.name == name))
                .collect();
            if databases.is_empty() {
                debug!("Host {} has no active databases, skipping", host.identity());
                continue;
            }

            report
                .hosts
                .push(self.run_host(host, &databases, &config, options).await);
        }

        if let Some(wanted) = &options.host {
            if report.hosts.is_empty() {
                warn!("No active host matches {}", wanted);
            }
        }
        Ok(report)
    }

    async fn run_host(
        &self,
        host: &Host,
        databases: &[&Database],
        config: &GlobalConfig,
        options: &RunOptions,
    ) -> HostReport {
        let mut report = HostReport {
            identity: host.identity().to_string(),
            error: None,
            databases: Vec::new(),
        };
        info!("Backing up host {}", report.identity);

        if let Err(e) = host.validate() {
            error!("{}", e);
            report.error = Some(e.to_string());
            return report;
        }

        let mut tunnel = match (&host.ssh, host.use_ssh_tunnel) {
            (Some(ssh), true) => {
                match open_tunnel(ssh, &host.db_host, host.db_port, &self.tunnel_config).await {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        error!("Host {}: {}", report.identity, e);
                        report.error = Some(e.to_string());
                        return report;
                    }
                }
            }
            _ => None,
        };

        for (i, database) in databases.iter().enumerate() {
            match self
                .run_database(host, database, config, options, tunnel.as_ref())
                .await
            {
                Ok(outcome) => report.databases.push(DatabaseReport {
                    name: database.name.clone(),
                    outcome,
                }),
                Err(e) => {
                    error!("Host {}: {}", report.identity, e);
                    report.error = Some(e.to_string());
                    report.databases.push(DatabaseReport {
                        name: database.name.clone(),
                        outcome: DatabaseOutcome::Failed {
                            table: None,
                            error: e.to_string(),
                        },
                    });
                    report
                        .databases
                        .extend(databases[i + 1..].iter().map(|d| DatabaseReport {
                            name: d.name.clone(),
                            outcome: DatabaseOutcome::Skipped {
                                reason: format!("host failed: {e}"),
                            },
                        }));
                    break;
                }
            }
        }

        if let Some(tunnel) = tunnel.as_mut() {
            tunnel.close().await;
        }
        report
    }

    /// One database pass. Errors returned here end the host.
    async fn run_database(
        &self,
        host: &Host,
        database: &Database,
        config: &GlobalConfig,
        options: &RunOptions,
        tunnel: Option<&TunnelHandle>,
    ) -> Result<DatabaseOutcome, ConfigError> {
        let remote = remote_descriptor(host, &database.name, tunnel);
        let local = local_descriptor(host, &database.name, config);
        info!("Backing up {} to {}", remote, local);

        let source = match self.connector.connect(&remote).await {
            Ok(source) => source,
            Err(e) => {
                let error = format!("Could not connect to {remote}: {e}");
                return Ok(self.fail(database, None, error).await);
            }
        };
        let destination =
            match ensure_local_database(self.connector, &local, config.create_missing_databases)
                .await
            {
                Ok(destination) => destination,
                Err(e) => {
                    disconnect(source.as_ref()).await;
                    return Err(e);
                }
            };

        let result = self
            .transfer(
                host,
                database,
                config,
                options,
                source.as_ref(),
                destination.as_ref(),
            )
            .await;
        disconnect(source.as_ref()).await;
        disconnect(destination.as_ref()).await;

        match result {
            Ok(tables) => {
                let rows: u64 = tables.iter().map(|t| t.rows).sum();
                info!(
                    "Database {} backed up: {} tables, {} rows",
                    database.name,
                    tables.len(),
                    rows
                );
                self.notify(database.webhook_success.as_deref()).await;
                Ok(DatabaseOutcome::Succeeded { tables })
            }
            Err(PassError::Host(e)) => Err(e),
            Err(PassError::Database { table, error }) => {
                Ok(self.fail(database, table, error).await)
            }
        }
    }

    async fn transfer(
        &self,
        host: &Host,
        database: &Database,
        config: &GlobalConfig,
        options: &RunOptions,
        source: &dyn Endpoint,
        destination: &dyn Endpoint,
    ) -> Result<Vec<TableSyncReport>, PassError> {
        if config.skip_tz_check || options.skip_tz_check {
            debug!("Timezone check skipped");
        } else {
            verify_timezones(source, destination).await?;
        }

        let reconciler =
            SchemaReconciler::new(source, destination, self.catalog, host.id, &database.name);
        let schema = reconciler.reconcile(&database.tables).await?;

        let engine = SyncEngine::new(
            source,
            destination,
            self.catalog,
            EngineSettings::from(config),
        );
        let mut reports = Vec::with_capacity(schema.tables.len());
        for name in &schema.tables {
            let table = self
                .catalog
                .register_table(host.id, &database.name, name)
                .await
                .map_err(|e| PassError::Database {
                    table: Some(name.clone()),
                    error: format!("Catalog update failed: {e:#}"),
                })?;
            reports.push(engine.sync_table(&table).await?);
        }
        Ok(reports)
    }

    async fn fail(
        &self,
        database: &Database,
        table: Option<String>,
        error: String,
    ) -> DatabaseOutcome {
        warn!("Database {} failed: {}", database.name, error);
        self.notify(database.webhook_failure.as_deref()).await;
        DatabaseOutcome::Failed { table, error }
    }

    async fn notify(&self, url: Option<&str>) {
        let Some(url) = url else {
            return;
        };
        if let Err(e) = self.notifier.notify(url).await {
            warn!("{:#}", e);
        }
    }
}

async fn disconnect(endpoint: &dyn Endpoint) {
    if let Err(e) = endpoint.disconnect().await {
        warn!("Failed to disconnect from {}: {}", endpoint.database(), e);
    }
}
