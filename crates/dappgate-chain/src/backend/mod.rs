//! Chain backends.
//!
//! A backend is one live connection to one endpoint. The connection manager
//! owns backends; adapters borrow them per request.

mod blockfrost;
mod http;
mod lightclient;
mod rpc;

pub use blockfrost::BlockfrostBackend;
pub use http::HttpJsonRpcBackend;
pub use lightclient::{connect_light_client, fetch_chain_spec};
pub use rpc::SubxtRpcBackend;

use crate::error::ChainError;
use async_trait::async_trait;
use dappgate_core::ChainFamily;
use futures::stream::BoxStream;
use serde_json::Value;

/// Stream of notifications from a backend subscription.
pub type NotificationStream = BoxStream<'static, Result<Value, ChainError>>;

#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Get the provider label used in logs and status reports.
    fn label(&self) -> &str;

    /// Whether `subscribe` is available.
    fn supports_push(&self) -> bool {
        false
    }

    /// Send one request.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError>;

    /// Open a server-side subscription.
    async fn subscribe(
        &self,
        method: &str,
        _params: Value,
        _unsubscribe: &str,
    ) -> Result<NotificationStream, ChainError> {
        Err(ChainError::Unsupported(format!(
            "{} does not support subscriptions ({})",
            self.label(),
            method
        )))
    }

    /// Resolves once the transport reports that the connection is gone.
    async fn closed(&self) {
        futures::future::pending::<()>().await
    }
}

/// Get the cheap request used to probe a backend of the given family.
pub fn health_method(family: ChainFamily) -> &'static str {
    match family {
        ChainFamily::Evm => "eth_chainId",
        ChainFamily::Substrate => "system_health",
        ChainFamily::Cardano => "health",
    }
}

/// Convert JSON params to a positional list.
pub(crate) fn positional(params: Value) -> Result<Vec<Value>, ChainError> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(ChainError::InvalidData(format!(
            "expected positional params, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_method_per_family() {
        assert_eq!(health_method(ChainFamily::Evm), "eth_chainId");
        assert_eq!(health_method(ChainFamily::Substrate), "system_health");
        assert_eq!(health_method(ChainFamily::Cardano), "health");
    }

    #[test]
    fn test_positional() {
        assert!(positional(json!(null)).unwrap().is_empty());
        assert_eq!(positional(json!([1, "a"])).unwrap().len(), 2);
        assert!(positional(json!({"a": 1})).is_err());
    }
}
