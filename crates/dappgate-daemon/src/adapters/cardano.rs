//! CIP-30 style wallet API for Cardano.

use super::{current_chain, permitted_accounts, revealing_backend, sign_with_confirmation};
use crate::context::Services;
use crate::error::ProviderError;
use crate::request::CardanoRequest;
use dappgate_chain::ChainInfo;
use dappgate_core::{Address, ChainFamily, Origin, SignMethod, SignRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

const FAMILY: ChainFamily = ChainFamily::Cardano;
const LOVELACE: &str = "lovelace";

/// Cap on the number of outputs offered as collateral.
const MAX_COLLATERAL_INPUTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub unit: String,
    pub quantity: String,
}

/// Unspent output in the shape the REST backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    #[serde(alias = "tx_hash")]
    pub tx_hash: String,
    #[serde(alias = "output_index")]
    pub output_index: u32,
    pub amount: Vec<Asset>,
}

impl Utxo {
    pub fn lovelace(&self) -> u64 {
        self.amount
            .iter()
            .filter(|a| a.unit == LOVELACE)
            .filter_map(|a| a.quantity.parse::<u64>().ok())
            .sum()
    }

    fn is_pure_ada(&self) -> bool {
        self.amount.iter().all(|a| a.unit == LOVELACE)
    }
}

/// Largest outputs first until `amount` is covered; `None` if it cannot be.
pub fn select_for_amount(mut utxos: Vec<Utxo>, amount: u64) -> Option<Vec<Utxo>> {
    utxos.sort_by_key(|u| std::cmp::Reverse(u.lovelace()));
    let mut total = 0u64;
    let mut selected = Vec::new();
    for utxo in utxos {
        if total >= amount {
            break;
        }
        total = total.saturating_add(utxo.lovelace());
        selected.push(utxo);
    }
    (total >= amount).then_some(selected)
}

/// Fewest pure-ADA outputs covering `amount`, smallest single output preferred.
pub fn select_collateral(utxos: Vec<Utxo>, amount: u64) -> Option<Vec<Utxo>> {
    let mut pure: Vec<Utxo> = utxos.into_iter().filter(Utxo::is_pure_ada).collect();
    pure.sort_by_key(Utxo::lovelace);
    if let Some(single) = pure.iter().find(|u| u.lovelace() >= amount) {
        return Some(vec![single.clone()]);
    }
    let picked = select_for_amount(pure, amount)?;
    (picked.len() <= MAX_COLLATERAL_INPUTS).then_some(picked)
}

pub struct CardanoAdapter {
    services: Arc<Services>,
}

impl CardanoAdapter {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn handle(
        &self,
        origin: &Origin,
        name: Option<&str>,
        request: CardanoRequest,
    ) -> Result<Value, ProviderError> {
        match request {
            CardanoRequest::Enable => {
                let granted = self
                    .services
                    .registry
                    .authorize(origin, name.map(str::to_string), &[FAMILY], false)
                    .await?;
                if !granted {
                    return Err(ProviderError::UserRejected);
                }
                Ok(json!(true))
            }
            CardanoRequest::GetNetworkId => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                let id = chain
                    .cardano_network_id
                    .ok_or_else(|| ProviderError::UnrecognizedChain(chain.slug.clone()))?;
                Ok(json!(id))
            }
            CardanoRequest::GetUtxos { amount } => {
                let (chain, address) = self.current(origin)?;
                let utxos = self.utxos(&chain, &address).await?;
                match amount {
                    None => Ok(json!(utxos)),
                    Some(amount) => Ok(json!(select_for_amount(utxos, amount))),
                }
            }
            CardanoRequest::GetCollateral { amount } => {
                let (chain, address) = self.current(origin)?;
                let utxos = self.utxos(&chain, &address).await?;
                Ok(json!(select_collateral(utxos, amount)))
            }
            CardanoRequest::GetBalance => {
                let (chain, address) = self.current(origin)?;
                let backend = revealing_backend(&self.services, &chain).await?;
                let info = backend.request("addresses", json!([address])).await?;
                let balance: u64 = info
                    .get("amount")
                    .cloned()
                    .map(serde_json::from_value::<Vec<Asset>>)
                    .transpose()
                    .map_err(|e| ProviderError::Internal(e.to_string()))?
                    .unwrap_or_default()
                    .iter()
                    .filter(|a| a.unit == LOVELACE)
                    .filter_map(|a| a.quantity.parse::<u64>().ok())
                    .sum();
                Ok(json!(balance.to_string()))
            }
            CardanoRequest::GetUsedAddresses => Ok(json!(permitted_accounts(&self.services, origin, FAMILY))),
            CardanoRequest::GetUnusedAddresses | CardanoRequest::GetRewardAddresses => Ok(json!([])),
            CardanoRequest::GetChangeAddress => {
                let (_, address) = self.current(origin)?;
                Ok(json!(address))
            }
            CardanoRequest::SignTx { tx, partial_sign } => {
                let (chain, address) = self.current(origin)?;
                let request = SignRequest {
                    address,
                    method: SignMethod::CardanoTx,
                    chain: Some(chain.slug.clone()),
                    data: json!({ "tx": tx, "partialSign": partial_sign }),
                };
                Ok(json!(sign_with_confirmation(&self.services, origin, request).await?))
            }
            CardanoRequest::SignData { address, payload } => {
                if !permitted_accounts(&self.services, origin, FAMILY).contains(&address) {
                    return Err(ProviderError::Unauthorized);
                }
                let chain = current_chain(&self.services, origin, FAMILY)?;
                let request = SignRequest {
                    address,
                    method: SignMethod::CardanoData,
                    chain: Some(chain.slug.clone()),
                    data: json!({ "payload": payload }),
                };
                let signature = sign_with_confirmation(&self.services, origin, request).await?;
                Ok(json!({ "signature": signature }))
            }
            CardanoRequest::SubmitTx { tx } => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                self.services.transactions.submit(&chain, &tx).await
            }
        }
    }

    /// Current chain and the account the origin selected for it.
    fn current(&self, origin: &Origin) -> Result<(Arc<ChainInfo>, Address), ProviderError> {
        let chain = current_chain(&self.services, origin, FAMILY)?;
        let address = permitted_accounts(&self.services, origin, FAMILY)
            .into_iter()
            .next()
            .ok_or(ProviderError::AccountChanged)?;
        Ok((chain, address))
    }

    async fn utxos(&self, chain: &ChainInfo, address: &Address) -> Result<Vec<Utxo>, ProviderError> {
        let backend = revealing_backend(&self.services, chain).await?;
        let raw = backend.request("addresses_utxos", json!([address])).await?;
        serde_json::from_value(raw).map_err(|e| ProviderError::Internal(format!("malformed UTXO list: {}", e)))
    }
}
