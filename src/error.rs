//! Error types shared by the connection, schema and sync layers.
//!
//! Driver errors are translated into [`DbError`] at the endpoint boundary so
//! the engine's failure policy depends on [`TransferErrorKind`] rather than
//! on MySQL error codes.

use std::fmt;
use thiserror::Error;

/// Server error codes that mean the server ran out of memory or disk.
const RESOURCE_EXHAUSTED_CODES: [u16; 5] = [3, 1037, 1038, 1041, 1114];

/// "MySQL server has gone away" and "Lost connection to MySQL server".
const CONNECTION_LOST_CODES: [u16; 2] = [2006, 2013];

/// "Unknown database".
pub const UNKNOWN_DATABASE_CODE: u16 = 1049;

/// An error reported by a database endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("MySQL server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("MySQL connection error: {0}")]
    Connection(String),

    #[error("MySQL error: {0}")]
    Other(String),
}

impl DbError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            DbError::Server { code, .. } if RESOURCE_EXHAUSTED_CODES.contains(code) => {
                TransferErrorKind::ResourceExhausted
            }
            DbError::Server { code, .. } if CONNECTION_LOST_CODES.contains(code) => {
                TransferErrorKind::ConnectionLost
            }
            DbError::Connection(_) => TransferErrorKind::ConnectionLost,
            _ => TransferErrorKind::Other,
        }
    }

    pub fn is_unknown_database(&self) -> bool {
        matches!(self, DbError::Server { code, .. } if *code == UNKNOWN_DATABASE_CODE)
    }
}

impl From<mysql_async::Error> for DbError {
    fn from(err: mysql_async::Error) -> Self {
        use mysql_async::{DriverError, Error};

        match err {
            Error::Server(server) => DbError::Server {
                code: server.code,
                message: server.message,
            },
            Error::Io(io) => DbError::Connection(io.to_string()),
            Error::Driver(DriverError::ConnectionClosed)
            | Error::Driver(DriverError::PoolDisconnected) => {
                DbError::Connection("connection closed".to_string())
            }
            other => DbError::Other(other.to_string()),
        }
    }
}

/// Classification of a failed page read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// The server ran out of memory or disk, typically while sorting a
    /// large table on an unindexed column.
    ResourceExhausted,
    ConnectionLost,
    Other,
}

impl TransferErrorKind {
    /// Hint printed for operators when a transfer fails this way.
    pub fn operator_hint(&self) -> Option<&'static str> {
        match self {
            TransferErrorKind::ResourceExhausted | TransferErrorKind::ConnectionLost => Some(
                "the server may have run out of memory: check the timestamp column is indexed or set the table to always resync",
            ),
            TransferErrorKind::Other => None,
        }
    }
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferErrorKind::ResourceExhausted => "resource exhausted",
            TransferErrorKind::ConnectionLost => "connection lost",
            TransferErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A table-level failure. Aborts the current table and the rest of its database.
#[derive(Debug, Error)]
#[error("Transfer of table `{table}` failed ({kind}): {message}")]
pub struct TransferError {
    pub table: String,
    pub kind: TransferErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn from_db(table: &str, err: &DbError) -> Self {
        Self {
            table: table.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// A cursor could not be read or persisted.
    pub fn checkpoint(table: &str, err: &anyhow::Error) -> Self {
        Self {
            table: table.to_string(),
            kind: TransferErrorKind::Other,
            message: format!("cursor store: {err:#}"),
        }
    }
}

/// Errors fatal to the current host.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid host {host}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Backup database `{database}` does not exist and creation is disabled")]
    LocalDatabaseMissing { database: String },

    #[error("Timezone mismatch: remote is {remote}, local is {local}")]
    TimezoneMismatch { remote: String, local: String },

    #[error("Could not prepare backup database `{database}`: {source}")]
    LocalDatabase {
        database: String,
        #[source]
        source: DbError,
    },

    #[error("Could not read timezone of {side} server: {source}")]
    Timezone {
        side: &'static str,
        #[source]
        source: DbError,
    },
}

/// Schema reconciliation failed; fatal to the current database.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Schema reconciliation failed on table `{table}`: {source}")]
    Table {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Schema reconciliation failed: {0}")]
    Listing(#[from] DbError),

    #[error("Catalog update failed: {0:#}")]
    Catalog(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("No free local port found after {0} probes")]
    NoFreePort(usize),

    #[error("Failed to spawn tunnel process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
