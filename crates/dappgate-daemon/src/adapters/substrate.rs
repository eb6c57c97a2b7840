//! Signer and RPC bridge for Polkadot-SDK chains.

use super::{allowed_account, backend_for, current_chain, sign_with_confirmation};
use crate::context::Services;
use crate::error::ProviderError;
use crate::request::{SignBytesParams, SignExtrinsicParams, SubstrateRequest};
use dappgate_core::{ChainFamily, Origin, SignMethod, SignRequest};
use serde_json::{Value, json};
use std::sync::Arc;

const FAMILY: ChainFamily = ChainFamily::Substrate;

pub struct SubstrateAdapter {
    services: Arc<Services>,
}

impl SubstrateAdapter {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn handle(&self, origin: &Origin, request: SubstrateRequest) -> Result<Value, ProviderError> {
        match request {
            SubstrateRequest::SignBytes(params) => self.sign_bytes(origin, params).await,
            SubstrateRequest::SignExtrinsic(params) => self.sign_extrinsic(origin, params).await,
            SubstrateRequest::RpcSend { method, params } => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                let backend = backend_for(&self.services, &chain).await?;
                Ok(backend.request(&method, params).await?)
            }
        }
    }

    async fn sign_bytes(&self, origin: &Origin, params: SignBytesParams) -> Result<Value, ProviderError> {
        allowed_account(&self.services, origin, FAMILY, &params.address)?;
        hex::decode(params.data.trim_start_matches("0x")).map_err(ProviderError::invalid_params)?;
        let chain = current_chain(&self.services, origin, FAMILY).ok();
        let request = SignRequest {
            address: params.address,
            method: SignMethod::SubstrateBytes,
            chain: chain.map(|c| c.slug.clone()),
            data: json!({ "data": params.data }),
        };
        let signature = sign_with_confirmation(&self.services, origin, request).await?;
        Ok(json!({ "signature": signature }))
    }

    async fn sign_extrinsic(&self, origin: &Origin, params: SignExtrinsicParams) -> Result<Value, ProviderError> {
        allowed_account(&self.services, origin, FAMILY, &params.address)?;
        let chain = self
            .services
            .chains
            .by_genesis_hash(&params.genesis_hash)
            .ok_or_else(|| ProviderError::UnrecognizedChain(params.genesis_hash.clone()))?;

        let mut data = params.payload;
        data.insert("address".to_string(), json!(params.address));
        data.insert("genesisHash".to_string(), json!(params.genesis_hash));
        let request = SignRequest {
            address: params.address,
            method: SignMethod::SubstrateExtrinsic,
            chain: Some(chain.slug.clone()),
            data: Value::Object(data),
        };
        let signature = sign_with_confirmation(&self.services, origin, request).await?;
        Ok(json!({ "signature": signature }))
    }
}
