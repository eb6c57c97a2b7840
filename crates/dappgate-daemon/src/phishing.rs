//! Phishing deny-list and the wallet's own allow/deny overrides.

use async_trait::async_trait;
use dappgate_core::{Origin, PhishingConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum PhishingError {
    #[error("Failed to fetch deny-list: {0}")]
    Fetch(String),

    #[error("Invalid deny-list format: {0}")]
    Format(String),
}

impl From<reqwest::Error> for PhishingError {
    fn from(e: reqwest::Error) -> Self {
        PhishingError::Fetch(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked { redirect: String },
}

#[async_trait]
pub trait DenyListSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<String>, PhishingError>;
}

/// Accepts either a bare array of hosts or an `{allow, deny}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum DenyListBody {
    Hosts(Vec<String>),
    Split {
        #[serde(default)]
        deny: Vec<String>,
    },
}

pub struct HttpDenyList {
    client: reqwest::Client,
    url: String,
}

impl HttpDenyList {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DenyListSource for HttpDenyList {
    async fn fetch(&self) -> Result<Vec<String>, PhishingError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(PhishingError::Fetch(format!("HTTP {}", response.status())));
        }
        let text = response.text().await?;
        parse_deny_list(&text)
    }
}

pub fn parse_deny_list(text: &str) -> Result<Vec<String>, PhishingError> {
    let body: DenyListBody =
        serde_json::from_str(text).map_err(|e| PhishingError::Format(e.to_string()))?;
    Ok(match body {
        DenyListBody::Hosts(hosts) => hosts,
        DenyListBody::Split { deny } => deny,
    })
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// `a.b.example.com`, `b.example.com`, `example.com`. Bare TLDs are skipped.
fn host_suffixes(host: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(host);
    std::iter::from_fn(move || {
        let current = rest?;
        rest = current.split_once('.').map(|(_, tail)| tail).filter(|t| t.contains('.'));
        Some(current)
    })
}

#[derive(Default)]
struct GuardState {
    listed: HashSet<String>,
    allow: HashSet<String>,
    deny: HashSet<String>,
}

impl GuardState {
    fn matches(set: &HashSet<String>, host: &str) -> bool {
        host_suffixes(host).any(|suffix| set.contains(suffix))
    }
}

pub struct PhishingGuard {
    redirect_url: String,
    state: RwLock<GuardState>,
}

impl PhishingGuard {
    pub fn new(config: &PhishingConfig) -> Self {
        let state = GuardState {
            listed: HashSet::new(),
            allow: config.allow.iter().map(|h| normalize_host(h)).collect(),
            deny: config.deny.iter().map(|h| normalize_host(h)).collect(),
        };
        Self {
            redirect_url: config.redirect_url.clone(),
            state: RwLock::new(state),
        }
    }

    /// Internal deny overrides block, internal allow overrides beat the list.
    pub fn check(&self, origin: &Origin) -> Verdict {
        let host = normalize_host(&origin.host());
        let blocked = match self.state.read() {
            Ok(state) => {
                if GuardState::matches(&state.deny, &host) {
                    true
                } else if GuardState::matches(&state.allow, &host) {
                    false
                } else {
                    GuardState::matches(&state.listed, &host)
                }
            }
            Err(_) => {
                tracing::warn!("Phishing state poisoned, blocking {}", origin);
                true
            }
        };
        if blocked {
            tracing::warn!("Blocked phishing origin {}", origin);
            Verdict::Blocked {
                redirect: format!("{}#{}", self.redirect_url, origin),
            }
        } else {
            Verdict::Allowed
        }
    }

    pub fn set_list(&self, hosts: Vec<String>) {
        let listed: HashSet<String> = hosts.iter().map(|h| normalize_host(h)).collect();
        let count = listed.len();
        if let Ok(mut state) = self.state.write() {
            state.listed = listed;
        }
        tracing::info!("Loaded phishing deny-list with {} hosts", count);
    }

    pub fn allow(&self, host: &str) {
        let host = normalize_host(host);
        if let Ok(mut state) = self.state.write() {
            state.deny.remove(&host);
            state.allow.insert(host);
        }
    }

    pub fn deny(&self, host: &str) {
        let host = normalize_host(host);
        if let Ok(mut state) = self.state.write() {
            state.allow.remove(&host);
            state.deny.insert(host);
        }
    }

    pub fn clear_override(&self, host: &str) {
        let host = normalize_host(host);
        if let Ok(mut state) = self.state.write() {
            state.allow.remove(&host);
            state.deny.remove(&host);
        }
    }

    pub async fn refresh(&self, source: &dyn DenyListSource) -> Result<(), PhishingError> {
        let hosts = source.fetch().await?;
        self.set_list(hosts);
        Ok(())
    }

    /// Refresh the list now and then every `interval` until cancelled.
    /// A failed refresh keeps the previous list.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        source: Arc<dyn DenyListSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = guard.refresh(source.as_ref()).await {
                            tracing::warn!("Phishing list refresh failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn guard() -> PhishingGuard {
        PhishingGuard::new(&PhishingConfig {
            deny_list_url: None,
            redirect_url: "https://wallet.invalid/phishing".into(),
            ..PhishingConfig::default()
        })
    }

    fn origin(raw: &str) -> Origin {
        Origin::parse(raw).unwrap()
    }

    #[test]
    fn test_host_suffixes() {
        let suffixes: Vec<&str> = host_suffixes("a.b.evil.com").collect();
        assert_eq!(suffixes, vec!["a.b.evil.com", "b.evil.com", "evil.com"]);
        let single: Vec<&str> = host_suffixes("localhost").collect();
        assert_eq!(single, vec!["localhost"]);
    }

    #[test]
    fn test_listed_subdomain_is_blocked() {
        let guard = guard();
        guard.set_list(vec!["evil.com".into()]);
        assert_eq!(
            guard.check(&origin("https://app.evil.com")),
            Verdict::Blocked {
                redirect: "https://wallet.invalid/phishing#https://app.evil.com".into()
            }
        );
        assert_eq!(guard.check(&origin("https://notevil.com")), Verdict::Allowed);
    }

    #[test]
    fn test_allow_override_beats_list() {
        let guard = guard();
        guard.set_list(vec!["evil.com".into()]);
        guard.allow("evil.com");
        assert_eq!(guard.check(&origin("https://evil.com")), Verdict::Allowed);
        guard.clear_override("evil.com");
        assert!(matches!(guard.check(&origin("https://evil.com")), Verdict::Blocked { .. }));
    }

    #[test]
    fn test_deny_override_blocks_unlisted() {
        let guard = guard();
        guard.deny("dapp.example");
        assert!(matches!(guard.check(&origin("https://dapp.example")), Verdict::Blocked { .. }));
        guard.allow("dapp.example");
        assert_eq!(guard.check(&origin("https://dapp.example")), Verdict::Allowed);
    }

    #[test]
    fn test_parse_deny_list_formats() {
        assert_eq!(parse_deny_list(r#"["a.com","b.com"]"#).unwrap(), vec!["a.com", "b.com"]);
        assert_eq!(
            parse_deny_list(r#"{"allow":["ok.com"],"deny":["bad.com"]}"#).unwrap(),
            vec!["bad.com"]
        );
        assert!(parse_deny_list("not json").is_err());
    }

    struct FailingSource;

    #[async_trait]
    impl DenyListSource for FailingSource {
        async fn fetch(&self) -> Result<Vec<String>, PhishingError> {
            Err(PhishingError::Fetch("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let guard = guard();
        guard.set_list(vec!["evil.com".into()]);
        assert!(guard.refresh(&FailingSource).await.is_err());
        assert!(matches!(guard.check(&origin("https://evil.com")), Verdict::Blocked { .. }));
    }
}
