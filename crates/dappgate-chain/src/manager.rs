//! Chain connection manager.
//!
//! One slot per `(chain, family)`. A slot outlives the connections made
//! through it, so callers that hold a slot keep seeing the latest one.
//!
//! Each slot carries a readiness generation. A generation is created when a
//! connection attempt starts and resolves at most once, the first time that
//! connection reaches `Connected`. Replacing the endpoint or losing the
//! connection starts a new generation; waiters on an older one are told
//! they were superseded and never see a later connection's success.
//!
//! Each connection is driven by its own task:
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Unstable
//!       ^              |            |            |
//!       +--------------+------------+------------+  (failure / teardown)
//! ```

use crate::backend::{ChainBackend, health_method};
use crate::connector::{BackendConnector, Endpoint};
use crate::error::ChainError;
use dappgate_core::{ChainFamily, ChainSlug, ConnectionConfig, ConnectionStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Longest pause between reconnection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionKey {
    pub chain: ChainSlug,
    pub family: ChainFamily,
}

impl ConnectionKey {
    pub fn new(chain: impl Into<ChainSlug>, family: ChainFamily) -> Self {
        Self {
            chain: chain.into(),
            family,
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.family, self.chain)
    }
}

/// Readiness of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub generation: u64,
    pub ready: bool,
}

/// Status report for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub chain: ChainSlug,
    pub family: ChainFamily,
    pub endpoint: Option<String>,
    pub provider: Option<String>,
    pub status: ConnectionStatus,
    pub generation: u64,
    pub ready: bool,
}

/// Resolves when one specific generation becomes ready.
pub struct GenerationReady {
    rx: watch::Receiver<Readiness>,
    generation: u64,
}

impl GenerationReady {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for this generation. Fails with `Superseded` once a newer one exists.
    pub async fn wait(mut self) -> Result<(), ChainError> {
        let generation = self.generation;
        let state = self
            .rx
            .wait_for(|r| r.generation != generation || r.ready)
            .await
            .map_err(|_| ChainError::Superseded)?;
        if state.generation == generation {
            Ok(())
        } else {
            Err(ChainError::Superseded)
        }
    }
}

struct Instance {
    id: u64,
    endpoint: Endpoint,
    cancel: CancellationToken,
    backend: Option<Arc<dyn ChainBackend>>,
}

struct Slot {
    key: ConnectionKey,
    status: watch::Sender<ConnectionStatus>,
    readiness: watch::Sender<Readiness>,
    instance: Mutex<Option<Instance>>,
}

impl Slot {
    fn new(key: ConnectionKey) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (readiness, _) = watch::channel(Readiness::default());
        Self {
            key,
            status,
            readiness,
            instance: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instance>> {
        self.instance.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn usable_backend(&self) -> Option<Arc<dyn ChainBackend>> {
        if !self.status.borrow().is_usable() {
            return None;
        }
        self.lock().as_ref().and_then(|i| i.backend.clone())
    }

    fn start_generation(&self) {
        self.readiness.send_modify(|r| {
            r.generation += 1;
            r.ready = false;
        });
    }

    /// Apply `f` only if `instance_id` still owns the slot.
    fn publish(&self, instance_id: u64, f: impl FnOnce(&Self, &mut Instance)) -> bool {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(instance) if instance.id == instance_id => {
                f(self, instance);
                true
            }
            _ => false,
        }
    }
}

/// Owns every chain connection.
pub struct ConnectionManager {
    slots: RwLock<HashMap<ConnectionKey, Arc<Slot>>>,
    connector: Arc<dyn BackendConnector>,
    config: ConnectionConfig,
    next_instance: std::sync::atomic::AtomicU64,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BackendConnector>, config: ConnectionConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            connector,
            config,
            next_instance: std::sync::atomic::AtomicU64::new(1),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn slot(&self, key: &ConnectionKey) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    fn slot_or_create(&self, key: &ConnectionKey) -> Arc<Slot> {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        self.slots
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new(key.clone())))
            .clone()
    }

    // ==================== Lifecycle ====================

    /// Connect `key` to `url` unless it is already using that URL.
    pub fn ensure_connected(&self, key: &ConnectionKey, url: &str) -> Result<(), ChainError> {
        self.update_endpoint(key, url).map(|_| ())
    }

    /// Point `key` at `url`.
    ///
    /// Returns false without side effects when the URL is unchanged.
    /// Otherwise the old connection is torn down, the status becomes
    /// `Connecting` before this returns, and a fresh readiness generation
    /// starts.
    pub fn update_endpoint(&self, key: &ConnectionKey, url: &str) -> Result<bool, ChainError> {
        let endpoint = Endpoint::new(key.chain.clone(), key.family, url)?;
        let slot = self.slot_or_create(key);

        let mut guard = slot.lock();
        if let Some(current) = guard.as_ref()
            && current.endpoint.url == url
        {
            return Ok(false);
        }

        if let Some(old) = guard.take() {
            tracing::info!("Replacing endpoint for {}: {} -> {}", key, old.endpoint.url, url);
            old.cancel.cancel();
        } else {
            tracing::info!("Connecting {} to {}", key, url);
        }

        let id = self
            .next_instance
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let cancel = self.root.child_token();
        slot.start_generation();
        slot.status.send_replace(ConnectionStatus::Connecting);
        *guard = Some(Instance {
            id,
            endpoint: endpoint.clone(),
            cancel: cancel.clone(),
            backend: None,
        });
        drop(guard);

        let driver = Driver {
            slot: slot.clone(),
            instance_id: id,
            endpoint,
            connector: self.connector.clone(),
            config: self.config.clone(),
            cancel,
        };
        self.tracker.spawn(driver.run());
        Ok(true)
    }

    /// Tear down the connection for `key`. The slot stays, in `Disconnected`.
    pub fn disconnect(&self, key: &ConnectionKey) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let mut guard = slot.lock();
        let Some(old) = guard.take() else {
            return false;
        };
        old.cancel.cancel();
        slot.start_generation();
        slot.status.send_replace(ConnectionStatus::Disconnected);
        tracing::info!("Disconnected {}", key);
        true
    }

    /// Cancel every connection and wait for the driver tasks to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    // ==================== Queries ====================

    pub fn status(&self, key: &ConnectionKey) -> ConnectionStatus {
        self.slot(key)
            .map(|s| *s.status.borrow())
            .unwrap_or_default()
    }

    pub fn watch_status(&self, key: &ConnectionKey) -> watch::Receiver<ConnectionStatus> {
        self.slot_or_create(key).status.subscribe()
    }

    pub fn info(&self, key: &ConnectionKey) -> Option<ConnectionInfo> {
        self.slot(key).map(|slot| describe(&slot))
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let mut out: Vec<ConnectionInfo> = slots.iter().map(|s| describe(s)).collect();
        out.sort_by(|a, b| (a.family, &a.chain).cmp(&(b.family, &b.chain)));
        out
    }

    // ==================== Readiness ====================

    /// Readiness of the generation current at the time of the call.
    pub fn readiness(&self, key: &ConnectionKey) -> Result<GenerationReady, ChainError> {
        let slot = self
            .slot(key)
            .ok_or_else(|| ChainError::UnknownChain(key.to_string()))?;
        let rx = slot.readiness.subscribe();
        let generation = rx.borrow().generation;
        Ok(GenerationReady { rx, generation })
    }

    /// Wait until whichever generation is current becomes ready.
    pub async fn recover(&self, key: &ConnectionKey) -> Result<(), ChainError> {
        let slot = self
            .slot(key)
            .ok_or_else(|| ChainError::UnknownChain(key.to_string()))?;
        let mut rx = slot.readiness.subscribe();
        rx.wait_for(|r| r.ready)
            .await
            .map(|_| ())
            .map_err(|_| ChainError::Disconnected(key.to_string()))
    }

    /// Get a usable backend, polling while the connection recovers.
    ///
    /// Gives up with `Disconnected` after the configured number of polls.
    pub async fn backend(&self, key: &ConnectionKey) -> Result<Arc<dyn ChainBackend>, ChainError> {
        let slot = self
            .slot(key)
            .ok_or_else(|| ChainError::UnknownChain(key.to_string()))?;
        if let Some(backend) = slot.usable_backend() {
            return Ok(backend);
        }
        tracing::debug!("Waiting for {} to reconnect", key);
        for _ in 0..self.config.reconnect_attempts {
            tokio::time::sleep(self.config.reconnect_poll()).await;
            if let Some(backend) = slot.usable_backend() {
                return Ok(backend);
            }
        }
        tracing::warn!("Gave up waiting for {}", key);
        Err(ChainError::Disconnected(key.to_string()))
    }

    /// Get the backend if it is usable right now.
    pub fn try_backend(&self, key: &ConnectionKey) -> Option<Arc<dyn ChainBackend>> {
        self.slot(key).and_then(|s| s.usable_backend())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn describe(slot: &Slot) -> ConnectionInfo {
    let readiness = *slot.readiness.borrow();
    let (endpoint, provider) = match slot.lock().as_ref() {
        Some(i) => (Some(i.endpoint.url.clone()), Some(i.endpoint.strategy.label())),
        None => (None, None),
    };
    ConnectionInfo {
        chain: slot.key.chain.clone(),
        family: slot.key.family,
        endpoint,
        provider,
        status: *slot.status.borrow(),
        generation: readiness.generation,
        ready: readiness.ready,
    }
}

// ==================== Driver ====================

enum Outcome {
    Cancelled,
    Lost(String),
}

struct Driver {
    slot: Arc<Slot>,
    instance_id: u64,
    endpoint: Endpoint,
    connector: Arc<dyn BackendConnector>,
    config: ConnectionConfig,
    cancel: CancellationToken,
}

impl Driver {
    fn set_status(&self, status: ConnectionStatus) -> bool {
        self.slot.publish(self.instance_id, |slot, _| {
            slot.status.send_if_modified(|s| {
                let changed = *s != status;
                *s = status;
                changed
            });
        })
    }

    fn go_live(&self, backend: Arc<dyn ChainBackend>) -> bool {
        self.slot.publish(self.instance_id, |slot, instance| {
            instance.backend = Some(backend);
            slot.status.send_replace(ConnectionStatus::Connected);
            slot.readiness.send_if_modified(|r| {
                let first = !r.ready;
                r.ready = true;
                first
            });
        })
    }

    fn go_down(&self) -> bool {
        self.slot.publish(self.instance_id, |slot, instance| {
            instance.backend = None;
            slot.start_generation();
            slot.status.send_replace(ConnectionStatus::Disconnected);
        })
    }

    async fn run(self) {
        let key = &self.slot.key;
        let mut failures: u32 = 0;
        loop {
            if !self.set_status(ConnectionStatus::Connecting) {
                return;
            }
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                r = self.connector.connect(&self.endpoint) => r,
            };
            match connected {
                Ok(backend) => {
                    failures = 0;
                    if !self.go_live(backend.clone()) {
                        return;
                    }
                    match self.supervise(backend.as_ref()).await {
                        Outcome::Cancelled => return,
                        Outcome::Lost(reason) => {
                            tracing::warn!("Lost connection to {}: {}", key, reason);
                            if !self.go_down() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!("Failed to connect to {} via {}: {}", key, self.endpoint.url, e);
                    if !self.set_status(ConnectionStatus::Disconnected) {
                        return;
                    }
                    let backoff = self
                        .config
                        .reconnect_poll()
                        .saturating_mul(1 << failures.min(6))
                        .min(MAX_BACKOFF);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// Watch a live backend until it is lost or the connection is torn down.
    async fn supervise(&self, backend: &dyn ChainBackend) -> Outcome {
        let interval = self.config.health_interval();
        let method = health_method(self.endpoint.family);
        let mut failures: u32 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                _ = backend.closed() => return Outcome::Lost("transport closed".to_string()),
                _ = tokio::time::sleep(interval) => {}
            }

            let probe = tokio::select! {
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                r = tokio::time::timeout(interval, backend.request(method, serde_json::Value::Null)) => r,
            };
            match probe {
                Ok(Ok(_)) => {
                    if failures > 0 {
                        tracing::info!("{} is healthy again", self.slot.key);
                        failures = 0;
                        if !self.set_status(ConnectionStatus::Connected) {
                            return Outcome::Cancelled;
                        }
                    }
                }
                Ok(Err(e)) if !e.is_disconnect() => {
                    // The node answered, so it is alive.
                    tracing::debug!("Health probe for {} returned {}", self.slot.key, e);
                }
                result => {
                    failures += 1;
                    let reason = match result {
                        Ok(Err(e)) => e.to_string(),
                        _ => "health probe timed out".to_string(),
                    };
                    if failures >= self.config.unstable_threshold.max(1) {
                        return Outcome::Lost(reason);
                    }
                    tracing::warn!("{} is unstable: {}", self.slot.key, reason);
                    if !self.set_status(ConnectionStatus::Unstable) {
                        return Outcome::Cancelled;
                    }
                }
            }
        }
    }
}
