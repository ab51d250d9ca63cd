//! Connection descriptors for the remote and backup sides of a database.

use std::fmt;
use tracing::info;

use super::tunnel::{TunnelHandle, LOCALHOST};
use crate::catalog::{GlobalConfig, Host};
use crate::error::{ConfigError, DbError};
use crate::mysql::{Connector, Endpoint};

/// MySQL identifier length limit.
pub const MAX_IDENTIFIER_LEN: usize = 64;

const BACKUP_PREFIX: &str = "backup_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Remote,
    Local,
}

/// Connection parameters for one database, rebuilt for every database pass.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub role: EndpointRole,
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            EndpointRole::Remote => "remote",
            EndpointRole::Local => "local",
        };
        write!(
            f,
            "{} {}@{}:{}/{}",
            role, self.username, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("role", &self.role)
            .finish()
    }
}

/// The remote database, through the tunnel when one is open.
pub fn remote_descriptor(
    host: &Host,
    database: &str,
    tunnel: Option<&TunnelHandle>,
) -> ConnectionDescriptor {
    let (address, port) = match tunnel {
        Some(tunnel) => (LOCALHOST.to_string(), tunnel.local_port()),
        None => (host.db_host.clone(), host.db_port),
    };
    ConnectionDescriptor {
        host: address,
        port,
        username: host.db_username.clone(),
        password: host.db_password.clone(),
        database: database.to_string(),
        role: EndpointRole::Remote,
    }
}

/// The backup database on the backup server.
pub fn local_descriptor(host: &Host, database: &str, config: &GlobalConfig) -> ConnectionDescriptor {
    let name = if config.preserve_database_names {
        database.to_string()
    } else {
        backup_database_name(host.identity(), database)
    };
    ConnectionDescriptor {
        host: config.backup_db_host.clone(),
        port: config.backup_db_port,
        username: config.backup_db_username.clone(),
        password: config.backup_db_password.clone(),
        database: name,
        role: EndpointRole::Local,
    }
}

/// `backup_<host>_<database>`, with the host reduced to `[A-Za-z0-9_]` and
/// shortened so the result fits in a MySQL identifier.
pub fn backup_database_name(host_identity: &str, database: &str) -> String {
    let sanitized: String = host_identity
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    let fixed = BACKUP_PREFIX.len() + 1 + database.chars().count();
    let room = MAX_IDENTIFIER_LEN.saturating_sub(fixed);
    let host_part: String = sanitized.chars().take(room).collect();

    format!("{BACKUP_PREFIX}{host_part}_{database}")
        .chars()
        .take(MAX_IDENTIFIER_LEN)
        .collect()
}

/// Connect to the backup database, creating it on the first run.
pub async fn ensure_local_database(
    connector: &dyn Connector,
    descriptor: &ConnectionDescriptor,
    create: bool,
) -> Result<Box<dyn Endpoint>, ConfigError> {
    let local_error = |source: DbError| ConfigError::LocalDatabase {
        database: descriptor.database.clone(),
        source,
    };

    match connector.connect(descriptor).await {
        Ok(endpoint) => Ok(endpoint),
        Err(e) if e.is_unknown_database() => {
            if !create {
                return Err(ConfigError::LocalDatabaseMissing {
                    database: descriptor.database.clone(),
                });
            }
            info!("Creating backup database {}", descriptor.database);
            connector
                .create_database(descriptor)
                .await
                .map_err(local_error)?;
            connector.connect(descriptor).await.map_err(local_error)
        }
        Err(e) => Err(local_error(e)),
    }
}
