//! Catalog entities: hosts, databases, tables and global settings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::error::ConfigError;

/// Table selection sentinel meaning "every table in the database".
pub const ALL_TABLES: &str = "[all]";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Duplicate host id {0}")]
    DuplicateHost(u64),
}

/// The catalog file: global settings plus the configured hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub settings: GlobalConfig,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl CatalogFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(toml)?;
        let mut seen = std::collections::HashSet::new();
        for host in &file.hosts {
            if !seen.insert(host.id) {
                return Err(CatalogError::DuplicateHost(host.id));
            }
        }
        Ok(file)
    }
}

/// A remote MySQL server, optionally reached through an SSH tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: u64,
    pub db_host: String,
    #[serde(default = "default_mysql_port")]
    pub db_port: u16,
    pub db_username: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default)]
    pub use_ssh_tunnel: bool,
    #[serde(default)]
    pub ssh: Option<SshEndpoint>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub databases: Vec<Database>,
}

impl Host {
    /// The name operators know the host by: the SSH host when tunnelling,
    /// the database address otherwise.
    pub fn identity(&self) -> &str {
        match (&self.ssh, self.use_ssh_tunnel) {
            (Some(ssh), true) => &ssh.host,
            _ => &self.db_host,
        }
    }

    pub fn active_databases(&self) -> impl Iterator<Item = &Database> {
        self.databases.iter().filter(|d| d.is_active)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidHost {
            host: self.identity().to_string(),
            reason: reason.to_string(),
        };

        if self.db_host.trim().is_empty() {
            return Err(invalid("database address is empty"));
        }
        if self.db_username.trim().is_empty() {
            return Err(invalid("database username is empty"));
        }
        if self.use_ssh_tunnel {
            match &self.ssh {
                None => return Err(invalid("tunnel enabled without an [hosts.ssh] section")),
                Some(ssh) if ssh.host.trim().is_empty() || ssh.username.trim().is_empty() => {
                    return Err(invalid("SSH host and username are required"))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
}

impl SshEndpoint {
    /// Authentication material, key pair first.
    pub fn auth(&self) -> SshAuth {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|v| !v.is_empty()).cloned();

        if let Some(path) = non_empty(&self.private_key_path) {
            SshAuth::KeyPair(path)
        } else if let Some(password) = non_empty(&self.password) {
            SshAuth::Password(password)
        } else {
            SshAuth::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    KeyPair(String),
    Password(String),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub webhook_success: Option<String>,
    #[serde(default)]
    pub webhook_failure: Option<String>,
    #[serde(default)]
    pub tables: TableSelection,
}

/// Which remote tables a database backs up.
///
/// Written in the catalog file as a list of names; `["[all]"]` (or
/// omitting the key) selects every table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum TableSelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl TableSelection {
    pub fn includes(&self, table: &str) -> bool {
        match self {
            TableSelection::All => true,
            TableSelection::Only(names) => names.iter().any(|n| n == table),
        }
    }

    pub fn filter(&self, tables: Vec<String>) -> Vec<String> {
        tables.into_iter().filter(|t| self.includes(t)).collect()
    }
}

impl From<Vec<String>> for TableSelection {
    fn from(names: Vec<String>) -> Self {
        if names.iter().any(|n| n == ALL_TABLES) {
            TableSelection::All
        } else {
            TableSelection::Only(names)
        }
    }
}

impl From<TableSelection> for Vec<String> {
    fn from(selection: TableSelection) -> Self {
        match selection {
            TableSelection::All => vec![ALL_TABLES.to_string()],
            TableSelection::Only(names) => names,
        }
    }
}

/// A registered table and its per-table policy flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub host_id: u64,
    pub database: String,
    pub name: String,
    pub is_active: bool,
    pub always_resync: bool,
    pub always_primary_key: bool,
}

impl Table {
    /// A first registration, with the global policy lists applied.
    pub fn register(host_id: u64, database: &str, name: &str, config: &GlobalConfig) -> Self {
        let listed = |list: &[String]| list.iter().any(|n| n == name);
        Self {
            host_id,
            database: database.to_string(),
            name: name.to_string(),
            is_active: !listed(&config.always_inactive_tables),
            always_resync: listed(&config.always_resync_tables),
            always_primary_key: listed(&config.always_primary_key_tables),
        }
    }

    pub fn cursor_key(&self) -> checkpoint::CursorKey {
        checkpoint::CursorKey::new(self.host_id, &self.database, &self.name)
    }
}

/// Global settings, the `[settings]` table of the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub backup_db_host: String,
    pub backup_db_port: u16,
    pub backup_db_username: String,
    pub backup_db_password: String,
    /// Rows read from the remote per page
    pub extract_chunk_size: usize,
    /// Rows written per upsert statement
    pub apply_chunk_size: usize,
    pub always_resync_tables: Vec<String>,
    pub always_inactive_tables: Vec<String>,
    pub always_primary_key_tables: Vec<String>,
    pub skip_tz_check: bool,
    pub preserve_database_names: bool,
    pub create_missing_databases: bool,
    pub timestamp_column: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            backup_db_host: "127.0.0.1".to_string(),
            backup_db_port: default_mysql_port(),
            backup_db_username: "root".to_string(),
            backup_db_password: String::new(),
            extract_chunk_size: 1000,
            apply_chunk_size: 500,
            always_resync_tables: Vec::new(),
            always_inactive_tables: Vec::new(),
            always_primary_key_tables: Vec::new(),
            skip_tz_check: false,
            preserve_database_names: false,
            create_missing_databases: true,
            timestamp_column: "updated_at".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_ssh_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[settings]
backup_db_host = "backup.internal"
extract_chunk_size = 500
always_resync_tables = ["sessions"]
always_inactive_tables = ["audit_log"]

[[hosts]]
id = 1
db_host = "10.0.0.5"
db_username = "reader"
db_password = "secret"
use_ssh_tunnel = true

[hosts.ssh]
host = "bastion.example.com"
username = "deploy"
private_key_path = "/home/deploy/.ssh/id_ed25519"

[[hosts.databases]]
name = "shop"
webhook_failure = "https://hooks.example.com/fail"
tables = ["orders", "customers"]

[[hosts.databases]]
name = "crm"
is_active = false
"#;

    #[test]
    fn test_parse_catalog_file() {
        let file = CatalogFile::from_toml(CATALOG).unwrap();
        assert_eq!(file.settings.backup_db_host, "backup.internal");
        assert_eq!(file.settings.backup_db_port, 3306);
        assert_eq!(file.settings.extract_chunk_size, 500);
        assert_eq!(file.settings.apply_chunk_size, 500);
        assert_eq!(file.settings.timestamp_column, "updated_at");

        let host = &file.hosts[0];
        assert_eq!(host.identity(), "bastion.example.com");
        assert_eq!(host.db_port, 3306);
        assert!(host.validate().is_ok());
        let ssh = host.ssh.as_ref().unwrap();
        assert_eq!(ssh.port, 22);
        assert_eq!(
            ssh.auth(),
            SshAuth::KeyPair("/home/deploy/.ssh/id_ed25519".into())
        );

        assert_eq!(
            host.databases[0].tables,
            TableSelection::Only(vec!["orders".into(), "customers".into()])
        );
        assert_eq!(host.databases[1].tables, TableSelection::All);
        assert_eq!(host.active_databases().count(), 1);
    }

    #[test]
    fn test_duplicate_host_ids_rejected() {
        let toml = r#"
[[hosts]]
id = 1
db_host = "a"
db_username = "u"

[[hosts]]
id = 1
db_host = "b"
db_username = "u"
"#;
        assert!(matches!(
            CatalogFile::from_toml(toml),
            Err(CatalogError::DuplicateHost(1))
        ));
    }

    #[test]
    fn test_all_tables_sentinel() {
        let selection = TableSelection::from(vec![ALL_TABLES.to_string()]);
        assert_eq!(selection, TableSelection::All);
        assert!(selection.includes("anything"));

        let only = TableSelection::Only(vec!["orders".into()]);
        assert_eq!(
            only.filter(vec!["orders".into(), "users".into()]),
            vec!["orders".to_string()]
        );
    }

    #[test]
    fn test_ssh_auth_priority() {
        let mut ssh = SshEndpoint {
            host: "h".into(),
            port: 22,
            username: "u".into(),
            password: Some("pw".into()),
            private_key_path: Some(String::new()),
        };
        assert_eq!(ssh.auth(), SshAuth::Password("pw".into()));
        ssh.private_key_path = Some("/k".into());
        assert_eq!(ssh.auth(), SshAuth::KeyPair("/k".into()));
        ssh.private_key_path = None;
        ssh.password = None;
        assert_eq!(ssh.auth(), SshAuth::None);
    }

    #[test]
    fn test_host_validation() {
        let mut file = CatalogFile::from_toml(CATALOG).unwrap();
        let host = &mut file.hosts[0];
        host.ssh = None;
        assert!(matches!(
            host.validate(),
            Err(ConfigError::InvalidHost { .. })
        ));
        host.use_ssh_tunnel = false;
        assert!(host.validate().is_ok());
        assert_eq!(host.identity(), "10.0.0.5");
    }

    #[test]
    fn test_register_applies_policy_lists() {
        let config = CatalogFile::from_toml(CATALOG).unwrap().settings;
        let sessions = Table::register(1, "shop", "sessions", &config);
        assert!(sessions.always_resync && sessions.is_active);

        let audit = Table::register(1, "shop", "audit_log", &config);
        assert!(!audit.is_active);

        let orders = Table::register(1, "shop", "orders", &config);
        assert!(orders.is_active && !orders.always_resync && !orders.always_primary_key);
    }
}
