//! Metadata lookup for EVM chains the wallet does not know yet.
//!
//! A chain id is resolved against the public ethereum-lists registry, then
//! one of the advertised RPC endpoints is asked for its chain id to make sure
//! the metadata is not stale.

use crate::error::ChainError;
use async_trait::async_trait;
use dappgate_core::{ChainFamily, NetworkProposal, ProbeConfig};
use lru::LruCache;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

const CACHE_SIZE: usize = 64;

#[async_trait]
pub trait ChainMetadataSource: Send + Sync {
    /// Resolve an EVM chain id into a network proposal.
    async fn lookup(&self, chain_id: u64) -> Result<NetworkProposal, ChainError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeCurrency {
    symbol: String,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct Explorer {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryEntry {
    name: String,
    chain_id: u64,
    #[serde(default)]
    rpc: Vec<String>,
    native_currency: NativeCurrency,
    #[serde(default)]
    explorers: Vec<Explorer>,
}

/// Keep endpoints we can dial as-is: no API key placeholders.
fn usable_rpc(url: &str) -> bool {
    !url.contains("${")
        && (url.starts_with("https://") || url.starts_with("wss://") || url.starts_with("http://"))
}

fn into_proposal(entry: RegistryEntry) -> Result<NetworkProposal, ChainError> {
    let rpc_urls: Vec<String> = entry.rpc.into_iter().filter(|u| usable_rpc(u)).collect();
    if rpc_urls.is_empty() {
        return Err(ChainError::Probe(format!(
            "chain {} lists no public endpoints",
            entry.chain_id
        )));
    }
    Ok(NetworkProposal {
        family: ChainFamily::Evm,
        evm_chain_id: Some(entry.chain_id),
        chain_name: entry.name,
        rpc_urls,
        block_explorer_urls: entry.explorers.into_iter().map(|e| e.url).collect(),
        native_symbol: entry.native_currency.symbol,
        native_decimals: entry.native_currency.decimals,
    })
}

/// Parse a hex quantity such as `0x1`.
pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

/// Registry-backed probe with a small LRU cache of successful lookups.
pub struct MetadataProbe {
    client: reqwest::Client,
    config: ProbeConfig,
    cache: Mutex<LruCache<u64, NetworkProposal>>,
}

impl MetadataProbe {
    pub fn new(config: ProbeConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ChainError::Probe(e.to_string()))?;
        let size = NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            client,
            config,
            cache: Mutex::new(LruCache::new(size)),
        })
    }

    fn cached(&self, chain_id: u64) -> Option<NetworkProposal> {
        self.cache.lock().ok()?.get(&chain_id).cloned()
    }

    async fn fetch(&self, chain_id: u64) -> Result<RegistryEntry, ChainError> {
        let url = self
            .config
            .chain_metadata_url
            .replace("{chain_id}", &chain_id.to_string());
        tracing::debug!("Looking up chain {} at {}", chain_id, url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Probe(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChainError::Probe(format!(
                "chain {} not found in registry (HTTP {})",
                chain_id,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ChainError::Probe(format!("malformed registry entry: {}", e)))
    }

    /// Ask an HTTP endpoint for its chain id.
    pub async fn verify_rpc(&self, url: &str, expected: u64) -> Result<(), ChainError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "eth_chainId", "params": [] });
        let response: serde_json::Value = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Probe(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Probe(e.to_string()))?;
        let reported = response
            .get("result")
            .and_then(|v| v.as_str())
            .and_then(parse_hex_u64)
            .ok_or_else(|| ChainError::Probe(format!("{} did not report a chain id", url)))?;
        if reported != expected {
            return Err(ChainError::Probe(format!(
                "{} reports chain {} instead of {}",
                url, reported, expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainMetadataSource for MetadataProbe {
    async fn lookup(&self, chain_id: u64) -> Result<NetworkProposal, ChainError> {
        if let Some(hit) = self.cached(chain_id) {
            return Ok(hit);
        }

        let mut proposal = into_proposal(self.fetch(chain_id).await?)?;

        // Keep only endpoints that answer for the right chain; websocket
        // endpoints are kept unverified.
        let mut verified = Vec::new();
        for url in &proposal.rpc_urls {
            if url.starts_with("ws") {
                verified.push(url.clone());
                continue;
            }
            match self.verify_rpc(url, chain_id).await {
                Ok(()) => verified.push(url.clone()),
                Err(e) => tracing::debug!("Skipping endpoint: {}", e),
            }
        }
        if !verified.iter().any(|u| u.starts_with("http")) {
            return Err(ChainError::Probe(format!("no reachable endpoint for chain {}", chain_id)));
        }
        proposal.rpc_urls = verified;

        tracing::info!("Resolved chain {} as {}", chain_id, proposal.chain_name);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(chain_id, proposal.clone());
        }
        Ok(proposal)
    }
}
