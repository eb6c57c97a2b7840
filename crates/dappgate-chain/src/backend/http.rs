//! JSON-RPC over HTTP POST.

use super::ChainBackend;
use crate::error::{ChainError, METHOD_NOT_FOUND};
use crate::strategy::{EndpointStrategy, Provider, shape_params};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

pub struct HttpJsonRpcBackend {
    client: reqwest::Client,
    url: String,
    label: String,
    provider: Provider,
    api_key: Option<(String, String)>,
    next_id: AtomicU64,
}

impl HttpJsonRpcBackend {
    pub fn new(client: reqwest::Client, strategy: &EndpointStrategy) -> Self {
        Self {
            client,
            url: strategy.url.clone(),
            label: strategy.label(),
            provider: strategy.provider,
            api_key: strategy.api_key.clone(),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Turn a decoded JSON-RPC response into a result.
fn into_result(method: &str, response: RpcResponse) -> Result<Value, ChainError> {
    if let Some(err) = response.error {
        if err.code == METHOD_NOT_FOUND {
            return Err(ChainError::MethodNotFound(method.to_string()));
        }
        return Err(ChainError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

#[async_trait]
impl ChainBackend for HttpJsonRpcBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut body = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        let params = shape_params(self.provider, params);
        if !params.is_null() {
            body["params"] = params;
        }

        tracing::trace!("-> {} {} #{}", self.label, method, id);
        let mut request = self.client.post(&self.url).json(&body);
        if let Some((name, value)) = &self.api_key {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ChainError::Transport(format!("{} returned HTTP {}", self.label, status)));
        }
        let decoded: RpcResponse = response.json().await?;
        into_result(method, decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(v: Value) -> RpcResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_result() {
        let r = into_result("eth_chainId", decode(json!({"jsonrpc":"2.0","id":1,"result":"0x1"})));
        assert_eq!(r.unwrap(), json!("0x1"));
    }

    #[test]
    fn test_null_result() {
        let r = into_result("eth_getTransactionByHash", decode(json!({"jsonrpc":"2.0","id":1,"result":null})));
        assert_eq!(r.unwrap(), Value::Null);
    }

    #[test]
    fn test_method_not_found() {
        let r = into_result(
            "foo",
            decode(json!({"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}})),
        );
        assert!(matches!(r, Err(ChainError::MethodNotFound(m)) if m == "foo"));
    }

    #[test]
    fn test_rpc_error_keeps_code_and_data() {
        let r = into_result(
            "eth_call",
            decode(json!({"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted","data":"0x08c379a0"}})),
        );
        match r {
            Err(ChainError::Rpc { code, message, data }) => {
                assert_eq!(code, 3);
                assert_eq!(message, "execution reverted");
                assert_eq!(data, Some(json!("0x08c379a0")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
