//! Endpoint classification.
//!
//! The endpoint URL decides both how we talk to a chain (transport) and which
//! provider quirks apply to the requests we send.

use crate::error::ChainError;
use url::Url;

/// How requests reach the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// JSON-RPC over HTTP POST.
    Http,
    /// JSON-RPC over a websocket, with subscriptions.
    Ws,
    /// Embedded smoldot light client; the URL points at a chain spec.
    LightClient { chain_spec_url: String },
    /// Blockfrost REST API.
    BlockfrostRest,
}

/// Provider-specific request shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Generic,
    Infura,
    Alchemy,
    OnFinality,
    Blockfrost,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Generic => "JSON-RPC",
            Provider::Infura => "Infura",
            Provider::Alchemy => "Alchemy",
            Provider::OnFinality => "OnFinality",
            Provider::Blockfrost => "Blockfrost",
        }
    }

    /// Hosted providers reject requests that omit `params`.
    pub fn requires_explicit_params(&self) -> bool {
        matches!(self, Provider::Infura | Provider::Alchemy | Provider::OnFinality)
    }
}

/// A classified endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStrategy {
    pub transport: Transport,
    pub provider: Provider,
    /// URL to dial, with credentials moved out of the query string.
    pub url: String,
    /// Credential header to attach to every request.
    pub api_key: Option<(String, String)>,
}

impl EndpointStrategy {
    /// Get a human-readable name for logs and status reports.
    pub fn label(&self) -> String {
        match &self.transport {
            Transport::LightClient { .. } => "Light client".to_string(),
            Transport::Ws => format!("{} (ws)", self.provider.label()),
            Transport::Http => format!("{} (http)", self.provider.label()),
            Transport::BlockfrostRest => self.provider.label().to_string(),
        }
    }

    /// Whether the backend can push notifications.
    pub fn supports_push(&self) -> bool {
        matches!(self.transport, Transport::Ws | Transport::LightClient { .. })
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Remove a query parameter from a URL, returning its value.
fn take_query_param(url: &mut Url, name: &str) -> Option<String> {
    let mut found = None;
    let rest: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            if k == name {
                found = Some(v.into_owned());
                None
            } else {
                Some((k.into_owned(), v.into_owned()))
            }
        })
        .collect();
    if found.is_some() {
        if rest.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(rest);
        }
    }
    found
}

/// Classify an endpoint URL.
pub fn select_strategy(raw: &str) -> Result<EndpointStrategy, ChainError> {
    let invalid = |reason: &str| ChainError::InvalidEndpoint(raw.to_string(), reason.to_string());

    if let Some(spec) = raw.strip_prefix("light:") {
        let spec_url = Url::parse(spec).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(spec_url.scheme(), "http" | "https") {
            return Err(invalid("chain spec must be fetched over http(s)"));
        }
        return Ok(EndpointStrategy {
            transport: Transport::LightClient {
                chain_spec_url: spec.to_string(),
            },
            provider: Provider::Generic,
            url: raw.to_string(),
            api_key: None,
        });
    }

    let mut url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?.to_lowercase();
    let is_ws = match url.scheme() {
        "ws" | "wss" => true,
        "http" | "https" => false,
        other => return Err(invalid(&format!("unsupported scheme {}", other))),
    };

    if host_matches(&host, "blockfrost.io") {
        if is_ws {
            return Err(invalid("Blockfrost is only reachable over https"));
        }
        let api_key = take_query_param(&mut url, "project_id").map(|k| ("project_id".to_string(), k));
        return Ok(EndpointStrategy {
            transport: Transport::BlockfrostRest,
            provider: Provider::Blockfrost,
            url: url.to_string().trim_end_matches('/').to_string(),
            api_key,
        });
    }

    let provider = if host_matches(&host, "infura.io") {
        Provider::Infura
    } else if host_matches(&host, "alchemy.com") {
        Provider::Alchemy
    } else if host_matches(&host, "onfinality.io") {
        Provider::OnFinality
    } else {
        Provider::Generic
    };

    let api_key = match provider {
        Provider::OnFinality => take_query_param(&mut url, "apikey").map(|k| ("apikey".to_string(), k)),
        _ => None,
    };

    Ok(EndpointStrategy {
        transport: if is_ws { Transport::Ws } else { Transport::Http },
        provider,
        url: url.to_string(),
        api_key,
    })
}

/// Normalize request params for a provider.
///
/// JSON-RPC allows omitting `params`; hosted providers do not.
pub fn shape_params(provider: Provider, params: serde_json::Value) -> serde_json::Value {
    match params {
        serde_json::Value::Null if provider.requires_explicit_params() => serde_json::json!([]),
        serde_json::Value::Null => serde_json::Value::Null,
        other => other,
    }
}
