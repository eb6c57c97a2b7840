//! Transaction construction and submission.

use crate::error::ProviderError;
use async_trait::async_trait;
use dappgate_chain::{ChainInfo, ConnectionKey, ConnectionManager, parse_hex_u64};
use dappgate_core::{Address, ChainFamily, TransactionRequest};
use serde_json::{Value, json};
use std::sync::Arc;

#[async_trait]
pub trait TransactionService: Send + Sync {
    /// Build the transaction the user will approve, with a fee estimate.
    async fn prepare(
        &self,
        chain: &ChainInfo,
        from: &Address,
        draft: Value,
    ) -> Result<TransactionRequest, ProviderError>;

    /// Broadcast a signed transaction. Returns what the node reports, usually a hash.
    async fn submit(&self, chain: &ChainInfo, signed: &str) -> Result<Value, ProviderError>;
}

/// Estimates and submits through the live chain connection.
pub struct RpcTransactionService {
    connections: Arc<ConnectionManager>,
}

impl RpcTransactionService {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    async fn call(&self, chain: &ChainInfo, method: &str, params: Value) -> Result<Value, ProviderError> {
        let key = ConnectionKey::new(chain.slug.clone(), chain.family);
        let backend = self.connections.backend(&key).await?;
        Ok(backend.request(method, params).await?)
    }

    async fn quantity(&self, chain: &ChainInfo, method: &str, params: Value) -> Result<u64, ProviderError> {
        let value = self.call(chain, method, params).await?;
        value
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| ProviderError::Internal(format!("{} returned {}", method, value)))
    }
}

#[async_trait]
impl TransactionService for RpcTransactionService {
    async fn prepare(
        &self,
        chain: &ChainInfo,
        from: &Address,
        draft: Value,
    ) -> Result<TransactionRequest, ProviderError> {
        if chain.family != ChainFamily::Evm {
            return Ok(TransactionRequest {
                chain: chain.slug.clone(),
                from: from.clone(),
                draft,
                estimated_fee: None,
            });
        }

        let Value::Object(mut tx) = draft else {
            return Err(ProviderError::InvalidParams("transaction must be an object".to_string()));
        };
        if let Some(id) = chain.evm_chain_id_hex() {
            tx.entry("chainId").or_insert(Value::String(id));
        }

        let gas = match tx.get("gas").and_then(Value::as_str).and_then(parse_hex_u64) {
            Some(gas) => gas,
            None => {
                let gas = self
                    .quantity(chain, "eth_estimateGas", json!([Value::Object(tx.clone())]))
                    .await?;
                tx.insert("gas".to_string(), Value::String(format!("0x{:x}", gas)));
                gas
            }
        };
        let price = match tx
            .get("maxFeePerGas")
            .or_else(|| tx.get("gasPrice"))
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
        {
            Some(price) => price,
            None => self.quantity(chain, "eth_gasPrice", json!([])).await?,
        };
        let fee = u128::from(gas) * u128::from(price);
        tracing::debug!("Prepared transaction on {}: gas {} at {} wei", chain.slug, gas, price);

        Ok(TransactionRequest {
            chain: chain.slug.clone(),
            from: from.clone(),
            draft: Value::Object(tx),
            estimated_fee: Some(fee.to_string()),
        })
    }

    async fn submit(&self, chain: &ChainInfo, signed: &str) -> Result<Value, ProviderError> {
        let method = match chain.family {
            ChainFamily::Evm => "eth_sendRawTransaction",
            ChainFamily::Substrate => "author_submitExtrinsic",
            ChainFamily::Cardano => "tx_submit",
        };
        tracing::info!("Submitting transaction on {}", chain.slug);
        self.call(chain, method, json!([signed])).await
    }
}
