//! Opening backends for endpoints.

use crate::backend::{
    BlockfrostBackend, ChainBackend, HttpJsonRpcBackend, SubxtRpcBackend, connect_light_client,
    health_method,
};
use crate::error::ChainError;
use crate::strategy::{EndpointStrategy, Transport, select_strategy};
use async_trait::async_trait;
use dappgate_core::{ChainFamily, ChainSlug};
use std::sync::Arc;
use std::time::Duration;

/// Where a connection should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub chain: ChainSlug,
    pub family: ChainFamily,
    /// The URL as configured, before credentials are split out.
    pub url: String,
    pub strategy: EndpointStrategy,
}

impl Endpoint {
    pub fn new(chain: impl Into<ChainSlug>, family: ChainFamily, url: &str) -> Result<Self, ChainError> {
        Ok(Self {
            chain: chain.into(),
            family,
            url: url.to_string(),
            strategy: select_strategy(url)?,
        })
    }
}

/// Opens a live backend for an endpoint.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainBackend>, ChainError>;
}

/// Connector for real networks.
pub struct DefaultConnector {
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("dappgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl BackendConnector for DefaultConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainBackend>, ChainError> {
        let strategy = &endpoint.strategy;
        tracing::info!("Trying {} via {}", endpoint.chain, strategy.label());

        let backend: Arc<dyn ChainBackend> = match &strategy.transport {
            Transport::Http => Arc::new(HttpJsonRpcBackend::new(self.http.clone(), strategy)),
            Transport::BlockfrostRest => Arc::new(BlockfrostBackend::new(self.http.clone(), strategy)),
            Transport::Ws => {
                Arc::new(SubxtRpcBackend::connect_ws(&strategy.url, strategy.label(), strategy.provider).await?)
            }
            Transport::LightClient { chain_spec_url } => {
                Arc::new(connect_light_client(&self.http, chain_spec_url).await?)
            }
        };

        // Stateless transports only prove reachability by answering.
        if !strategy.supports_push() {
            backend
                .request(health_method(endpoint.family), serde_json::Value::Null)
                .await
                .map_err(|e| ChainError::Connection(format!("{}: {}", endpoint.chain, e)))?;
        }

        tracing::info!("Connected to {} via {}", endpoint.chain, strategy.label());
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_new_classifies() {
        let e = Endpoint::new("polkadot", ChainFamily::Substrate, "wss://rpc.ibp.network/polkadot").unwrap();
        assert_eq!(e.strategy.transport, Transport::Ws);
        assert_eq!(e.chain, "polkadot");
    }

    #[test]
    fn test_endpoint_new_rejects_garbage() {
        assert!(Endpoint::new("x", ChainFamily::Evm, "::").is_err());
    }

    #[test]
    fn test_default_connector_builds() {
        assert!(DefaultConnector::new().is_ok());
    }
}
