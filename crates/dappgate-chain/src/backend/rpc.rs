//! Websocket and light client backends, both driven through subxt's RPC client.

use super::{ChainBackend, NotificationStream, positional};
use crate::error::ChainError;
use crate::strategy::{Provider, shape_params};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use subxt::backend::rpc::RpcClient;
use subxt::ext::subxt_rpcs::client::RpcParams;
use subxt::lightclient::LightClient;

pub struct SubxtRpcBackend {
    client: RpcClient,
    label: String,
    provider: Provider,
    /// Keeps the embedded light client running for as long as the backend lives.
    _light_client: Option<LightClient>,
}

impl SubxtRpcBackend {
    /// Connect to a websocket endpoint.
    pub async fn connect_ws(url: &str, label: String, provider: Provider) -> Result<Self, ChainError> {
        tracing::debug!("Opening websocket to {}", url);
        let client = RpcClient::from_url(url)
            .await
            .map_err(|e| ChainError::Connection(format!("{}: {}", url, e)))?;
        Ok(Self {
            client,
            label,
            provider,
            _light_client: None,
        })
    }

    pub(crate) fn from_light_client(client: RpcClient, light_client: LightClient) -> Self {
        Self {
            client,
            label: "Light client".to_string(),
            provider: Provider::Generic,
            _light_client: Some(light_client),
        }
    }
}

/// Positional parameters in the shape `provider` expects.
fn rpc_params(provider: Provider, params: Value) -> Result<RpcParams, ChainError> {
    let mut out = RpcParams::new();
    for value in positional(shape_params(provider, params))? {
        out.push(value)
            .map_err(|e| ChainError::InvalidData(e.to_string()))?;
    }
    Ok(out)
}

#[async_trait]
impl ChainBackend for SubxtRpcBackend {
    fn label(&self) -> &str {
        &self.label
    }

    fn supports_push(&self) -> bool {
        true
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let params = rpc_params(self.provider, params)?;
        tracing::trace!("-> {} {}", self.label, method);
        self.client
            .request::<Value>(method, params)
            .await
            .map_err(|e| ChainError::from_client_message(method, e.to_string()))
    }

    async fn subscribe(
        &self,
        method: &str,
        params: Value,
        unsubscribe: &str,
    ) -> Result<NotificationStream, ChainError> {
        let params = rpc_params(self.provider, params)?;
        let method_owned = method.to_string();
        let subscription = self
            .client
            .subscribe::<Value>(method, params, unsubscribe)
            .await
            .map_err(|e| ChainError::from_client_message(method, e.to_string()))?;
        Ok(subscription
            .map(move |item| item.map_err(|e| ChainError::from_client_message(&method_owned, e.to_string())))
            .boxed())
    }
}
