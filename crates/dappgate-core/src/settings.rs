//! Tuning knobs shared by the chain layer and the daemon.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection and liveness tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Delay between readiness checks while waiting for a backend.
    pub reconnect_poll_ms: u64,
    /// Readiness checks before a waiting request gives up.
    pub reconnect_attempts: u32,
    /// Interval between health probes of a live backend.
    pub health_interval_ms: u64,
    /// Consecutive failed probes that count as a disconnect.
    pub unstable_threshold: u32,
    /// Interval of synthesized connect/disconnect events for non-push backends.
    pub liveness_poll_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_poll_ms: 900,
            reconnect_attempts: 10,
            health_interval_ms: 15_000,
            unstable_threshold: 3,
            liveness_poll_ms: 3_000,
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms)
    }
}

/// Phishing deny-list settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhishingConfig {
    /// JSON array of blocked hosts. `None` disables the remote list.
    pub deny_list_url: Option<String>,
    pub refresh_secs: u64,
    /// Page shown instead of a blocked site.
    pub redirect_url: String,
    /// Hosts always allowed, even when listed.
    pub allow: Vec<String>,
    /// Hosts always blocked.
    pub deny: Vec<String>,
}

impl Default for PhishingConfig {
    fn default() -> Self {
        Self {
            deny_list_url: Some(
                "https://raw.githubusercontent.com/polkadot-js/phishing/master/all.json".to_string(),
            ),
            refresh_secs: 45 * 60,
            redirect_url: "https://dappgate.invalid/phishing".to_string(),
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

/// Chain metadata probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// `{chain_id}` is replaced by the decimal EVM chain id.
    pub chain_metadata_url: String,
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            chain_metadata_url:
                "https://raw.githubusercontent.com/ethereum-lists/chains/master/_data/chains/eip155-{chain_id}.json"
                    .to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_defaults() {
        let c = ConnectionConfig::default();
        assert_eq!(c.reconnect_poll(), Duration::from_millis(900));
        assert_eq!(c.reconnect_attempts, 10);
        assert_eq!(c.liveness_poll(), Duration::from_secs(3));
    }

    #[test]
    fn test_probe_template_has_placeholder() {
        assert!(ProbeConfig::default().chain_metadata_url.contains("{chain_id}"));
    }
}
