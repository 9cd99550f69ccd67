//! Configuration management for TChain

use crate::error::{ChainError, Result};
use crate::network::DEFAULT_IS_ALIVE_TIMEOUT;
use crate::peers::{DEFAULT_DISCOVERY_INTERVAL, DEFAULT_LIVENESS_INTERVAL};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// File read when no explicit config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Address other nodes reach us under, when it differs from the
    /// listen address (NAT, public interface).
    #[serde(default)]
    pub advertise_addr: Option<SocketAddr>,
    #[serde(default)]
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Zero disables periodic discovery.
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    /// Zero disables periodic liveness checks.
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_is_alive_timeout_secs")]
    pub is_alive_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            bootstrap_peers: Vec::new(),
            discovery_interval_secs: default_discovery_interval_secs(),
            liveness_interval_secs: default_liveness_interval_secs(),
            is_alive_timeout_secs: default_is_alive_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
        }
    }
}

impl NetworkConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn is_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.is_alive_timeout_secs)
    }
}

impl NodeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(text)
            .map_err(|e| ChainError::ConfigError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ChainError::ConfigError(
                "database.path must not be empty".to_string(),
            ));
        }
        if self.network.is_alive_timeout_secs == 0 {
            return Err(ChainError::ConfigError(
                "network.is_alive_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads the node configuration.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
/// used when present and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let text = match path {
        Some(path) => fs::read_to_string(path).map_err(|e| {
            ChainError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?,
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).unwrap_or_default(),
    };

    if text.trim().is_empty() {
        return Ok(NodeConfig::default());
    }
    NodeConfig::from_toml(&text)
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 2022))
}

fn default_discovery_interval_secs() -> u64 {
    DEFAULT_DISCOVERY_INTERVAL.as_secs()
}

fn default_liveness_interval_secs() -> u64 {
    DEFAULT_LIVENESS_INTERVAL.as_secs()
}

fn default_is_alive_timeout_secs() -> u64 {
    DEFAULT_IS_ALIVE_TIMEOUT.as_secs()
}

fn default_db_path() -> String {
    "./blocks.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.network.listen_addr.port(), 2022);
        assert_eq!(config.network.advertise_addr, None);
        assert_eq!(config.network.discovery_interval(), Duration::from_secs(300));
        assert_eq!(config.network.liveness_interval(), Duration::from_secs(120));
        assert_eq!(config.network.is_alive_timeout(), Duration::from_secs(5));
        assert_eq!(config.database.path, "./blocks.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            [network]
            listen_addr = "127.0.0.1:3033"
            advertise_addr = "203.0.113.9:3033"
            bootstrap_peers = ["10.0.0.2:2022"]
            liveness_interval_secs = 0
            "#,
        )
        .unwrap();

        let listen: SocketAddr = "127.0.0.1:3033".parse().unwrap();
        assert_eq!(config.network.listen_addr, listen);
        let advertised: SocketAddr = "203.0.113.9:3033".parse().unwrap();
        assert_eq!(config.network.advertise_addr, Some(advertised));
        assert_eq!(config.network.bootstrap_peers.len(), 1);
        assert_eq!(config.network.liveness_interval_secs, 0);
        assert_eq!(config.network.discovery_interval_secs, 300);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        let empty_path = NodeConfig::from_toml("[database]\npath = \"\"\n");
        assert!(matches!(empty_path, Err(ChainError::ConfigError(_))));

        let zero_timeout = NodeConfig::from_toml("[network]\nis_alive_timeout_secs = 0\n");
        assert!(matches!(zero_timeout, Err(ChainError::ConfigError(_))));

        let garbage = NodeConfig::from_toml("[network\n");
        assert!(matches!(garbage, Err(ChainError::ConfigError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(&path, "[database]\npath = \"/var/lib/tchain/blocks.db\"\n").unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.database.path, "/var/lib/tchain/blocks.db");

        let missing = load_config(Some(dir.path().join("absent.toml").as_path()));
        assert!(matches!(missing, Err(ChainError::ConfigError(_))));
    }
}
