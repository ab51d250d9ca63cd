//! Command-line interface for backup-sync
//!
//! # Usage Examples
//!
//! ## Backup
//! ```bash
//! # Every active host and database in the catalog
//! backup-sync backup --config catalog.toml --state-dir /var/lib/backup-sync
//!
//! # A single database of a single host
//! backup-sync backup --config catalog.toml \
//!   --host bastion.example.com --database shop
//! ```
//!
//! ## Inspection
//! ```bash
//! # Registered tables and their cursors
//! backup-sync tables --config catalog.toml
//!
//! # Parsed structure of a SHOW CREATE TABLE dump, as JSON
//! backup-sync parse-ddl orders.sql
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backup_sync::catalog::{Catalog, CatalogFile, CatalogStore};
use backup_sync::mysql::MySqlConnector;
use backup_sync::notify::HttpNotifier;
use backup_sync::{DatabaseOutcome, Orchestrator, RunOptions, RunReport};

#[derive(Parser)]
#[command(name = "backup-sync")]
#[command(about = "Incremental MySQL backups with schema drift handling")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct CatalogOpts {
    /// Catalog file describing hosts, databases and global settings
    #[arg(long, default_value = "backup-sync.toml", env = "BACKUP_SYNC_CONFIG")]
    config: PathBuf,

    /// Directory holding table registrations and cursors
    #[arg(long, default_value = ".backup-sync", env = "BACKUP_SYNC_STATE_DIR")]
    state_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up the configured databases
    Backup {
        #[command(flatten)]
        catalog: CatalogOpts,

        /// Only back up the host with this identity (SSH host when tunnelled)
        #[arg(long)]
        host: Option<String>,

        /// Only back up this database of the selected host
        #[arg(long, requires = "host")]
        database: Option<String>,

        /// Do not compare the remote and backup server timezones
        #[arg(long)]
        skip_tz_check: bool,

        /// Timeout for webhook calls, in seconds
        #[arg(long, default_value = "10", env = "BACKUP_SYNC_WEBHOOK_TIMEOUT")]
        webhook_timeout: u64,
    },
    /// Print the parsed structure of a SHOW CREATE TABLE statement as JSON
    ParseDdl {
        /// File containing the statement
        file: PathBuf,
    },
    /// List registered tables and their cursors
    Tables {
        #[command(flatten)]
        catalog: CatalogOpts,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Backup {
            catalog,
            host,
            database,
            skip_tz_check,
            webhook_timeout,
        } => {
            let store = open_catalog(&catalog)?;
            let notifier = HttpNotifier::new(Duration::from_secs(webhook_timeout))?;
            let connector = MySqlConnector;
            let orchestrator = Orchestrator::new(&store, &connector, &notifier);

            let options = RunOptions {
                host,
                database,
                skip_tz_check,
            };
            let report = orchestrator.run(&options).await?;
            summarize(&report)
        }
        Commands::ParseDdl { file } => {
            let ddl = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {file:?}"))?;
            let structure = mysql_ddl::parse_create_table(&ddl)
                .map_err(|e| anyhow::anyhow!("Failed to parse {file:?}: {e}"))?;
            println!("{}", serde_json::to_string_pretty(&structure)?);
            Ok(())
        }
        Commands::Tables { catalog } => {
            let store = open_catalog(&catalog)?;
            let cursors = store.list_cursors().await?;
            for table in store.tables().await? {
                let cursor = cursors
                    .iter()
                    .find(|c| c.key() == table.cursor_key())
                    .map(|c| c.cursor().to_string())
                    .unwrap_or_else(|| "none".to_string());
                let mut flags = Vec::new();
                if !table.is_active {
                    flags.push("inactive");
                }
                if table.always_resync {
                    flags.push("always-resync");
                }
                if table.always_primary_key {
                    flags.push("always-primary-key");
                }
                println!(
                    "host {} {}.{} [{}] {}",
                    table.host_id,
                    table.database,
                    table.name,
                    flags.join(","),
                    cursor
                );
            }
            Ok(())
        }
    }
}

fn open_catalog(opts: &CatalogOpts) -> anyhow::Result<CatalogStore> {
    let file = CatalogFile::from_file(&opts.config)
        .with_context(|| format!("Failed to load catalog from {:?}", opts.config))?;
    CatalogStore::open(file, Path::new(&opts.state_dir))
}

/// Log one line per database and fail when anything failed.
fn summarize(report: &RunReport) -> anyhow::Result<()> {
    let mut failed = 0;
    let mut total = 0;
    for host in &report.hosts {
        if let Some(error) = &host.error {
            warn!("Host {} stopped: {}", host.identity, error);
        }
        for database in &host.databases {
            total += 1;
            match &database.outcome {
                DatabaseOutcome::Succeeded { tables } => info!(
                    "{} / {}: {} tables synced",
                    host.identity,
                    database.name,
                    tables.len()
                ),
                DatabaseOutcome::Failed { table, error } => {
                    failed += 1;
                    match table {
                        Some(table) => warn!(
                            "{} / {}: failed on table {}: {}",
                            host.identity, database.name, table, error
                        ),
                        None => warn!("{} / {}: failed: {}", host.identity, database.name, error),
                    }
                }
                DatabaseOutcome::Skipped { reason } => {
                    info!("{} / {}: skipped: {}", host.identity, database.name, reason)
                }
            }
        }
    }

    if report.has_failures() {
        anyhow::bail!("{failed} of {total} databases failed");
    }
    Ok(())
}
