//! Shared services handed to every adapter and to the dispatcher.

use crate::error::ProviderError;
use crate::fanout::SubscriptionHub;
use crate::phishing::PhishingGuard;
use crate::services::{RpcTransactionService, TransactionService};
use dappgate_chain::{
    BackendConnector, ChainInfo, ChainMetadataSource, ChainStore, ConnectionKey,
    ConnectionManager, DefaultConnector, MetadataProbe,
};
use dappgate_core::{
    AppConfig, AuthRegistry, ChainFamily, ChainSlug, ConfirmationQueue, Keyring, StaticKeyring,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Services {
    pub registry: Arc<AuthRegistry>,
    pub queue: ConfirmationQueue,
    pub chains: Arc<ChainStore>,
    pub connections: Arc<ConnectionManager>,
    pub probe: Arc<dyn ChainMetadataSource>,
    pub transactions: Arc<dyn TransactionService>,
    pub hub: Arc<SubscriptionHub>,
    pub phishing: Arc<PhishingGuard>,
    pub default_chains: BTreeMap<ChainFamily, ChainSlug>,
    /// Cadence of synthesized connect/disconnect checks.
    pub liveness_poll: Duration,
    active_chains: Vec<ChainSlug>,
}

impl Services {
    pub fn builder(config: AppConfig) -> ServicesBuilder {
        ServicesBuilder::new(config)
    }

    /// Chain an origin starts on when it has not switched yet.
    pub fn default_chain(&self, family: ChainFamily) -> Option<Arc<ChainInfo>> {
        if let Some(chain) = self
            .default_chains
            .get(&family)
            .and_then(|slug| self.chains.get(slug))
        {
            return Some(chain);
        }
        self.chains
            .by_family(family)
            .into_iter()
            .find(|c| c.active)
    }

    /// Create the connection for a chain if it does not exist yet.
    pub fn connect_chain(&self, chain: &ChainInfo) -> Result<ConnectionKey, ProviderError> {
        let key = ConnectionKey::new(chain.slug.clone(), chain.family);
        if self.connections.info(&key).is_some_and(|i| i.endpoint.is_some()) {
            return Ok(key);
        }
        let url = chain
            .primary_rpc()
            .ok_or_else(|| ProviderError::ChainDisconnected(format!("{} has no endpoint", chain.slug)))?;
        self.connections.ensure_connected(&key, url)?;
        Ok(key)
    }

    /// Connect the configured chains and keep authorization records in step
    /// with the keyring.
    pub fn start(&self) {
        for slug in &self.active_chains {
            let Some(chain) = self.chains.get(slug) else {
                tracing::warn!("Configured chain {} is unknown", slug);
                continue;
            };
            if let Err(e) = self.connect_chain(&chain) {
                tracing::warn!("Failed to start connection for {}: {}", slug, e);
            }
        }
        self.registry.spawn_keyring_sync();
    }

    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
        self.connections.shutdown().await;
    }
}

/// Wires [`Services`] from configuration, with hooks for replacing the
/// network-facing parts.
pub struct ServicesBuilder {
    config: AppConfig,
    keyring: Option<Arc<dyn Keyring>>,
    connector: Option<Arc<dyn BackendConnector>>,
    probe: Option<Arc<dyn ChainMetadataSource>>,
    transactions: Option<Arc<dyn TransactionService>>,
    chains: Option<ChainStore>,
}

impl ServicesBuilder {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            keyring: None,
            connector: None,
            probe: None,
            transactions: None,
            chains: None,
        }
    }

    pub fn keyring(mut self, keyring: Arc<dyn Keyring>) -> Self {
        self.keyring = Some(keyring);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn BackendConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ChainMetadataSource>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn transactions(mut self, transactions: Arc<dyn TransactionService>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    pub fn chains(mut self, chains: ChainStore) -> Self {
        self.chains = Some(chains);
        self
    }

    pub fn build(self) -> Result<Services, ProviderError> {
        let config = self.config;

        let keyring = match self.keyring {
            Some(keyring) => keyring,
            None => Arc::new(StaticKeyring::new(config.accounts.clone())),
        };
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(DefaultConnector::new()?),
        };
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(MetadataProbe::new(config.probe.clone())?),
        };

        let chains = self.chains.unwrap_or_else(ChainStore::with_defaults);
        for (slug, url) in &config.endpoints {
            let Some(current) = chains.get(slug) else {
                tracing::warn!("Endpoint override for unknown chain {}", slug);
                continue;
            };
            let mut updated = (*current).clone();
            updated.rpc_urls.retain(|u| u != url);
            updated.rpc_urls.insert(0, url.clone());
            chains.upsert(updated);
        }
        for slug in &config.active_chains {
            chains.set_active(slug, true);
        }

        let connections = Arc::new(ConnectionManager::new(connector, config.connection.clone()));
        let transactions = match self.transactions {
            Some(transactions) => transactions,
            None => Arc::new(RpcTransactionService::new(connections.clone())),
        };
        let queue = ConfirmationQueue::new();
        let registry = Arc::new(AuthRegistry::new(keyring, queue.clone()));

        Ok(Services {
            registry,
            queue,
            chains: Arc::new(chains),
            connections,
            probe,
            transactions,
            hub: Arc::new(SubscriptionHub::new()),
            phishing: Arc::new(PhishingGuard::new(&config.phishing)),
            default_chains: config.default_chains.clone(),
            liveness_poll: config.connection.liveness_poll(),
            active_chains: config.active_chains.clone(),
        })
    }
}
