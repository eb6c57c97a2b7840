//! Daemon configuration and persistence utilities.
//!
//! Configuration lives in a JSON file under the platform config directory.
//! Every field has a default so that partial files keep working.

use crate::settings::{ConnectionConfig, PhishingConfig, ProbeConfig};
use crate::types::{ChainFamily, ChainSlug, KeyringAccount};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration error type.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Other configuration error.
    #[error("{0}")]
    Other(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Address of the channel listener.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Endpoint overrides keyed by chain slug.
    #[serde(default)]
    pub endpoints: BTreeMap<ChainSlug, String>,
    /// Chain an origin starts on, per family.
    #[serde(default = "default_chains")]
    pub default_chains: BTreeMap<ChainFamily, ChainSlug>,
    /// Chains connected at startup.
    #[serde(default = "default_active_chains")]
    pub active_chains: Vec<ChainSlug>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub phishing: PhishingConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Accounts exposed by the keyring (no key material).
    #[serde(default)]
    pub accounts: Vec<KeyringAccount>,
}

fn default_listen() -> String {
    "127.0.0.1:7545".to_string()
}

fn default_chains() -> BTreeMap<ChainFamily, ChainSlug> {
    BTreeMap::from([
        (ChainFamily::Evm, "ethereum".to_string()),
        (ChainFamily::Substrate, "polkadot".to_string()),
        (ChainFamily::Cardano, "cardano".to_string()),
    ])
}

fn default_active_chains() -> Vec<ChainSlug> {
    vec!["ethereum".to_string(), "polkadot".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            endpoints: BTreeMap::new(),
            default_chains: default_chains(),
            active_chains: default_active_chains(),
            connection: ConnectionConfig::default(),
            phishing: PhishingConfig::default(),
            probe: ProbeConfig::default(),
            accounts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Default chain for a family.
    pub fn default_chain(&self, family: ChainFamily) -> Option<&ChainSlug> {
        self.default_chains.get(&family)
    }
}

// ==================== Path Utilities ====================

/// Get the config directory.
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("xyz", "dappgate", "dappgate")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| ConfigError::Other("Could not determine config directory".to_string()))
}

/// Get the config file path.
pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

// ==================== Config I/O ====================

/// Load configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path()?)
}

/// Load configuration from a file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Save configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(&get_config_path()?, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.listen, "127.0.0.1:7545");
        assert_eq!(config.default_chain(ChainFamily::Evm).map(String::as_str), Some("ethereum"));
        assert_eq!(config.connection.reconnect_poll_ms, 900);
        assert_eq!(config.connection.reconnect_attempts, 10);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_app_config_deserialize_missing_fields() {
        let json = r#"{"listen":"0.0.0.0:9000","connection":{"reconnectAttempts":3}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.connection.reconnect_attempts, 3);
        assert_eq!(config.connection.reconnect_poll_ms, 900);
        assert_eq!(config.default_chains.len(), 3);
    }

    #[test]
    fn test_app_config_accounts() {
        let json = r#"{"accounts":[{"address":"0xAB00000000000000000000000000000000000001","keyType":"ethereum","createdAt":5}]}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(
            config.accounts[0].address.as_str(),
            "0xab00000000000000000000000000000000000001"
        );
        assert!(!config.accounts[0].external);
    }

    #[test]
    fn test_save_and_load_roundtrip_on_disk() {
        let dir = std::env::temp_dir().join(format!("dappgate-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.endpoints.insert("ethereum".into(), "https://eth.example".into());

        save_config_to(&path, &config).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.endpoints["ethereum"], "https://eth.example");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file_yields_default() {
        let path = std::env::temp_dir().join("dappgate-definitely-missing").join("config.json");
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.listen, AppConfig::default().listen);
    }

    #[test]
    fn test_get_config_path() {
        let result = get_config_path();
        assert!(result.is_ok());
        assert!(result.unwrap().to_string_lossy().contains("config.json"));
    }
}
