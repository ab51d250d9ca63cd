//! backup-sync library
//!
//! Keeps per-host MySQL backup databases up to date with their remote
//! sources, one table at a time.
//!
//! # Features
//!
//! - Optional SSH tunnel per host, spawned and torn down around each host pass
//! - Backup databases created on first use, named `backup_<host>_<database>`
//! - Schema drift detection with drop and recreate of drifted tables
//! - Incremental sync by timestamp or primary key, with a cursor persisted
//!   after every page
//! - Success and failure webhooks per database
//!
//! # Layout
//!
//! - [`catalog`] - hosts, databases, tables and cursors
//! - [`connect`] - tunnels, connection descriptors, timezone checks
//! - [`schema`] - table diff and drift handling
//! - [`sync`] - the per-table state machine and paged transfer
//! - [`orchestrator`] - hosts to databases to tables, failure isolation
//!
//! # CLI Usage
//!
//! ```bash
//! # Back up every active host
//! backup-sync backup --config catalog.toml
//!
//! # One database of one host, without the timezone check
//! backup-sync backup --config catalog.toml --host bastion.example.com \
//!   --database shop --skip-tz-check
//!
//! # Inspect the parsed structure of a SHOW CREATE TABLE dump
//! backup-sync parse-ddl orders.sql
//! ```

pub mod catalog;
pub mod connect;
pub mod error;
pub mod mysql;
pub mod notify;
pub mod orchestrator;
pub mod schema;
pub mod sync;
pub mod testing;

pub use orchestrator::{
    DatabaseOutcome, DatabaseReport, HostReport, Orchestrator, RunOptions, RunReport,
};
