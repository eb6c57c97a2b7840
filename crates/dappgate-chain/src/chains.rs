//! Chain store: known chains, their metadata and custom tokens.
//!
//! Readers get immutable snapshots; writes replace the whole map.

use dappgate_core::{
    Address, ChainFamily, ChainSlug, NetworkProposal, TokenProposal,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Static and user-supplied metadata about one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub slug: ChainSlug,
    pub name: String,
    pub family: ChainFamily,
    /// EIP-155 chain id, for EVM chains.
    #[serde(default)]
    pub evm_chain_id: Option<u64>,
    /// Genesis hash, for Substrate chains.
    #[serde(default)]
    pub genesis_hash: Option<String>,
    /// CIP-30 network id, for Cardano chains.
    #[serde(default)]
    pub cardano_network_id: Option<u8>,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub explorer_urls: Vec<String>,
    pub native_symbol: String,
    pub native_decimals: u8,
    /// Whether the chain is enabled for origins.
    #[serde(default)]
    pub active: bool,
    /// Added at runtime through a network proposal.
    #[serde(default)]
    pub custom: bool,
}

impl ChainInfo {
    /// Hex chain id as reported by `eth_chainId`.
    pub fn evm_chain_id_hex(&self) -> Option<String> {
        self.evm_chain_id.map(|id| format!("0x{:x}", id))
    }

    /// Primary endpoint.
    pub fn primary_rpc(&self) -> Option<&str> {
        self.rpc_urls.first().map(String::as_str)
    }
}

/// A custom token registered for a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub chain: ChainSlug,
    pub contract_address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<TokenProposal> for TokenInfo {
    fn from(p: TokenProposal) -> Self {
        Self {
            chain: p.chain,
            contract_address: p.contract_address,
            symbol: p.symbol,
            decimals: p.decimals,
            image: p.image,
        }
    }
}

pub type ChainSnapshot = Arc<BTreeMap<ChainSlug, Arc<ChainInfo>>>;

/// Registry of known chains.
pub struct ChainStore {
    chains: watch::Sender<ChainSnapshot>,
    tokens: Mutex<Vec<TokenInfo>>,
}

impl ChainStore {
    pub fn new(chains: impl IntoIterator<Item = ChainInfo>) -> Self {
        let map = chains
            .into_iter()
            .map(|c| (c.slug.clone(), Arc::new(c)))
            .collect::<BTreeMap<_, _>>();
        let (chains, _) = watch::channel(Arc::new(map));
        Self {
            chains,
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Store seeded with the built-in chain table.
    pub fn with_defaults() -> Self {
        Self::new(crate::config::default_chains())
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        self.chains.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChainSnapshot> {
        self.chains.subscribe()
    }

    pub fn get(&self, slug: &str) -> Option<Arc<ChainInfo>> {
        self.chains.borrow().get(slug).cloned()
    }

    /// Find an EVM chain by its EIP-155 id.
    pub fn by_evm_chain_id(&self, chain_id: u64) -> Option<Arc<ChainInfo>> {
        self.chains
            .borrow()
            .values()
            .find(|c| c.family == ChainFamily::Evm && c.evm_chain_id == Some(chain_id))
            .cloned()
    }

    /// Find a Substrate chain by genesis hash.
    pub fn by_genesis_hash(&self, hash: &str) -> Option<Arc<ChainInfo>> {
        let hash = hash.to_lowercase();
        self.chains
            .borrow()
            .values()
            .find(|c| c.genesis_hash.as_deref().map(str::to_lowercase) == Some(hash.clone()))
            .cloned()
    }

    pub fn by_family(&self, family: ChainFamily) -> Vec<Arc<ChainInfo>> {
        self.chains
            .borrow()
            .values()
            .filter(|c| c.family == family)
            .cloned()
            .collect()
    }

    /// Insert or replace a chain.
    pub fn upsert(&self, info: ChainInfo) {
        self.chains.send_modify(|map| {
            let mut next = (**map).clone();
            next.insert(info.slug.clone(), Arc::new(info));
            *map = Arc::new(next);
        });
    }

    /// Register a chain from an approved network proposal. Returns the new entry.
    ///
    /// An existing chain with the same EVM id is reactivated instead.
    pub fn add_from_proposal(&self, proposal: &NetworkProposal) -> Arc<ChainInfo> {
        if let Some(id) = proposal.evm_chain_id
            && let Some(existing) = self.by_evm_chain_id(id)
        {
            self.set_active(&existing.slug, true);
            return self.get(&existing.slug).unwrap_or(existing);
        }

        let slug = match proposal.evm_chain_id {
            Some(id) => format!("evm-{}", id),
            None => slugify(&proposal.chain_name),
        };
        let info = ChainInfo {
            slug: slug.clone(),
            name: proposal.chain_name.clone(),
            family: proposal.family,
            evm_chain_id: proposal.evm_chain_id,
            genesis_hash: None,
            cardano_network_id: None,
            rpc_urls: proposal.rpc_urls.clone(),
            explorer_urls: proposal.block_explorer_urls.clone(),
            native_symbol: proposal.native_symbol.clone(),
            native_decimals: proposal.native_decimals,
            active: true,
            custom: true,
        };
        tracing::info!("Registered custom chain {} ({})", info.name, slug);
        let entry = Arc::new(info);
        self.chains.send_modify(|map| {
            let mut next = (**map).clone();
            next.insert(slug, entry.clone());
            *map = Arc::new(next);
        });
        entry
    }

    /// Enable or disable a chain. Returns false for an unknown slug.
    pub fn set_active(&self, slug: &str, active: bool) -> bool {
        let mut found = false;
        self.chains.send_if_modified(|map| {
            let Some(current) = map.get(slug) else {
                return false;
            };
            found = true;
            if current.active == active {
                return false;
            }
            let mut updated = (**current).clone();
            updated.active = active;
            let mut next = (**map).clone();
            next.insert(slug.to_string(), Arc::new(updated));
            *map = Arc::new(next);
            true
        });
        found
    }

    /// Register a token. Returns false if it was already known.
    pub fn add_token(&self, token: TokenInfo) -> bool {
        let Ok(mut tokens) = self.tokens.lock() else {
            return false;
        };
        if tokens
            .iter()
            .any(|t| t.chain == token.chain && t.contract_address == token.contract_address)
        {
            return false;
        }
        tracing::info!("Added token {} on {}", token.symbol, token.chain);
        tokens.push(token);
        true
    }

    pub fn tokens(&self, chain: &str) -> Vec<TokenInfo> {
        self.tokens
            .lock()
            .map(|t| t.iter().filter(|t| t.chain == chain).cloned().collect())
            .unwrap_or_default()
    }
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}
