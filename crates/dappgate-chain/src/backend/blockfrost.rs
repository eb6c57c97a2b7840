//! Cardano access through the Blockfrost REST API.
//!
//! Blockfrost is not JSON-RPC, so requests are mapped to REST calls by method name:
//!
//! | method                   | call                              |
//! |--------------------------|-----------------------------------|
//! | `health`                 | `GET /health`                     |
//! | `addresses`              | `GET /addresses/{addr}`           |
//! | `addresses_utxos`        | `GET /addresses/{addr}/utxos`     |
//! | `blocks_latest`          | `GET /blocks/latest`              |
//! | `epochs_latest_parameters` | `GET /epochs/latest/parameters` |
//! | `tx_submit`              | `POST /tx/submit` (CBOR hex)      |

use super::{ChainBackend, positional};
use crate::error::ChainError;
use crate::strategy::EndpointStrategy;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct BlockfrostBackend {
    client: reqwest::Client,
    base_url: String,
    project_id: Option<String>,
}

/// A REST call derived from a method name.
#[derive(Debug, PartialEq, Eq)]
enum Call {
    Get(String),
    /// 404 means "nothing there" rather than an error.
    GetOrEmpty(String, Value),
    SubmitTx(Vec<u8>),
}

fn string_param(method: &str, params: &[Value], index: usize) -> Result<String, ChainError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ChainError::InvalidData(format!("{} expects a string parameter", method)))
}

fn plan(method: &str, params: Value) -> Result<Call, ChainError> {
    let params = positional(params)?;
    match method {
        "health" => Ok(Call::Get("/health".to_string())),
        "blocks_latest" => Ok(Call::Get("/blocks/latest".to_string())),
        "epochs_latest_parameters" => Ok(Call::Get("/epochs/latest/parameters".to_string())),
        "addresses" => {
            let address = string_param(method, &params, 0)?;
            Ok(Call::GetOrEmpty(format!("/addresses/{}", address), Value::Null))
        }
        "addresses_utxos" => {
            let address = string_param(method, &params, 0)?;
            Ok(Call::GetOrEmpty(format!("/addresses/{}/utxos", address), json!([])))
        }
        "tx_submit" => {
            let cbor = string_param(method, &params, 0)?;
            let bytes = hex::decode(cbor.trim_start_matches("0x"))
                .map_err(|e| ChainError::InvalidData(format!("transaction is not hex: {}", e)))?;
            Ok(Call::SubmitTx(bytes))
        }
        _ => Err(ChainError::MethodNotFound(method.to_string())),
    }
}

impl BlockfrostBackend {
    pub fn new(client: reqwest::Client, strategy: &EndpointStrategy) -> Self {
        Self {
            client,
            base_url: strategy.url.clone(),
            project_id: strategy.api_key.as_ref().map(|(_, v)| v.clone()),
        }
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.project_id {
            Some(id) => request.header("project_id", id),
            None => request,
        }
    }

    async fn decode(response: reqwest::Response) -> Result<Value, ChainError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ChainError::Transport(format!("Blockfrost returned HTTP {}", status)));
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request rejected")
            .to_string();
        Err(ChainError::Rpc {
            code: i64::from(status.as_u16()),
            message,
            data: Some(body),
        })
    }
}

#[async_trait]
impl ChainBackend for BlockfrostBackend {
    fn label(&self) -> &str {
        "Blockfrost"
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let call = plan(method, params)?;
        tracing::trace!("-> Blockfrost {:?}", call);
        match call {
            Call::Get(path) => {
                let response = self.with_auth(self.client.get(format!("{}{}", self.base_url, path))).send().await?;
                Self::decode(response).await
            }
            Call::GetOrEmpty(path, empty) => {
                let response = self.with_auth(self.client.get(format!("{}{}", self.base_url, path))).send().await?;
                if response.status().as_u16() == 404 {
                    return Ok(empty);
                }
                Self::decode(response).await
            }
            Call::SubmitTx(bytes) => {
                let response = self
                    .with_auth(self.client.post(format!("{}/tx/submit", self.base_url)))
                    .header("Content-Type", "application/cbor")
                    .body(bytes)
                    .send()
                    .await?;
                Self::decode(response).await
            }
        }
    }
}

impl std::fmt::Debug for BlockfrostBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockfrostBackend")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.project_id.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plan_utxos() {
        assert_eq!(
            plan("addresses_utxos", json!(["addr1xyz"])).unwrap(),
            Call::GetOrEmpty("/addresses/addr1xyz/utxos".to_string(), json!([]))
        );
    }

    #[test]
    fn test_plan_submit_decodes_hex() {
        assert_eq!(plan("tx_submit", json!(["0x84a4"])).unwrap(), Call::SubmitTx(vec![0x84, 0xa4]));
        assert!(matches!(plan("tx_submit", json!(["zz"])), Err(ChainError::InvalidData(_))));
    }

    #[test]
    fn test_plan_missing_param() {
        assert!(matches!(plan("addresses", json!([])), Err(ChainError::InvalidData(_))));
    }

    #[test]
    fn test_plan_unknown_method() {
        assert!(matches!(plan("eth_call", json!([])), Err(ChainError::MethodNotFound(_))));
    }
}
