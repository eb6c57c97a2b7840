//! Connection manager behaviour against a scripted connector.

use async_trait::async_trait;
use dappgate_chain::{
    BackendConnector, ChainBackend, ChainError, ConnectionKey, ConnectionManager, Endpoint,
};
use dappgate_core::{ChainFamily, ConnectionConfig, ConnectionStatus};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    SucceedAfter(Duration),
    Fail,
    Hang,
}

struct MockBackend {
    healthy: AtomicBool,
    closed: watch::Sender<bool>,
}

impl MockBackend {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            healthy: AtomicBool::new(true),
            closed,
        }
    }
}

#[async_trait]
impl ChainBackend for MockBackend {
    fn label(&self) -> &str {
        "mock"
    }

    async fn request(&self, method: &str, _params: Value) -> Result<Value, ChainError> {
        if method == "eth_chainId" && !self.healthy.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("probe failed".into()));
        }
        Ok(json!("0x1"))
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }
}

#[derive(Default)]
struct MockConnector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    backends: Mutex<Vec<Arc<MockBackend>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    fn with(self, url: &str, behavior: Behavior) -> Self {
        self.behaviors.lock().unwrap().insert(url.to_string(), behavior);
        self
    }

    fn latest(&self) -> Arc<MockBackend> {
        self.backends.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainBackend>, ChainError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&endpoint.url)
            .copied()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Succeed => {}
            Behavior::SucceedAfter(delay) => tokio::time::sleep(delay).await,
            Behavior::Fail => return Err(ChainError::Connection("refused".into())),
            Behavior::Hang => futures::future::pending::<()>().await,
        }
        let backend = Arc::new(MockBackend::new());
        self.backends.lock().unwrap().push(backend.clone());
        Ok(backend)
    }
}

const A: &str = "https://a.example";
const B: &str = "https://b.example";

fn key() -> ConnectionKey {
    ConnectionKey::new("ethereum", ChainFamily::Evm)
}

fn config() -> ConnectionConfig {
    ConnectionConfig {
        health_interval_ms: 1_000,
        unstable_threshold: 3,
        ..ConnectionConfig::default()
    }
}

async fn wait_status(manager: &ConnectionManager, status: ConnectionStatus) {
    let mut rx = manager.watch_status(&key());
    rx.wait_for(|s| *s == status).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_update_endpoint_supersedes_pending_readiness() {
    let connector = Arc::new(MockConnector::default().with(A, Behavior::Hang).with(B, Behavior::Succeed));
    let manager = ConnectionManager::new(connector.clone(), config());

    assert!(manager.update_endpoint(&key(), A).unwrap());
    let old = manager.readiness(&key()).unwrap();
    assert_eq!(manager.status(&key()), ConnectionStatus::Connecting);

    assert!(manager.update_endpoint(&key(), B).unwrap());
    // Status flips synchronously, before any driver runs.
    assert_eq!(manager.status(&key()), ConnectionStatus::Connecting);
    let new = manager.readiness(&key()).unwrap();
    assert!(new.generation() > old.generation());

    new.wait().await.unwrap();
    assert_eq!(manager.status(&key()), ConnectionStatus::Connected);
    assert!(matches!(old.wait().await, Err(ChainError::Superseded)));

    let info = manager.info(&key()).unwrap();
    assert_eq!(info.endpoint.as_deref(), Some(B));
    assert!(info.ready);
}

#[tokio::test(start_paused = true)]
async fn test_update_endpoint_same_url_is_noop() {
    let connector = Arc::new(MockConnector::default());
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.ensure_connected(&key(), A).unwrap();
    manager.recover(&key()).await.unwrap();
    let generation = manager.info(&key()).unwrap().generation;

    assert!(!manager.update_endpoint(&key(), A).unwrap());
    assert_eq!(manager.info(&key()).unwrap().generation, generation);
    assert_eq!(manager.status(&key()), ConnectionStatus::Connected);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_connection_never_publishes() {
    let connector = Arc::new(
        MockConnector::default()
            .with(A, Behavior::SucceedAfter(Duration::from_secs(2)))
            .with(B, Behavior::Hang),
    );
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.update_endpoint(&key(), A).unwrap();
    tokio::task::yield_now().await;
    manager.update_endpoint(&key(), B).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.status(&key()), ConnectionStatus::Connecting);
    assert!(manager.try_backend(&key()).is_none());
    assert!(!manager.info(&key()).unwrap().ready);
}

#[tokio::test(start_paused = true)]
async fn test_backend_gives_up_after_bounded_polls() {
    let connector = Arc::new(MockConnector::default().with(A, Behavior::Fail));
    let manager = ConnectionManager::new(connector, config());
    manager.update_endpoint(&key(), A).unwrap();

    let started = tokio::time::Instant::now();
    let result = manager.backend(&key()).await;
    assert!(matches!(result, Err(ChainError::Disconnected(_))));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900 * 10));
    assert!(waited < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_backend_waits_for_recovery() {
    let connector = Arc::new(MockConnector::default().with(A, Behavior::SucceedAfter(Duration::from_secs(3))));
    let manager = ConnectionManager::new(connector, config());
    manager.update_endpoint(&key(), A).unwrap();

    let backend = manager.backend(&key()).await.unwrap();
    assert_eq!(backend.label(), "mock");
}

#[tokio::test]
async fn test_unknown_key() {
    let manager = ConnectionManager::new(Arc::new(MockConnector::default()), config());
    assert!(matches!(manager.backend(&key()).await, Err(ChainError::UnknownChain(_))));
    assert!(manager.readiness(&key()).is_err());
    assert_eq!(manager.status(&key()), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_health_failures_go_unstable_then_reconnect() {
    let connector = Arc::new(MockConnector::default());
    let manager = ConnectionManager::new(connector.clone(), config());
    manager.update_endpoint(&key(), A).unwrap();
    manager.recover(&key()).await.unwrap();
    let first_generation = manager.info(&key()).unwrap().generation;

    connector.latest().healthy.store(false, Ordering::SeqCst);
    wait_status(&manager, ConnectionStatus::Unstable).await;

    // Still usable while unstable.
    assert!(manager.try_backend(&key()).is_some());

    let mut reconnected = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let info = manager.info(&key()).unwrap();
        if info.generation > first_generation && info.ready {
            reconnected = true;
            break;
        }
    }
    assert!(reconnected);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    assert_eq!(manager.status(&key()), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_unstable_recovers_without_new_generation() {
    let connector = Arc::new(MockConnector::default());
    let manager = ConnectionManager::new(connector.clone(), config());
    manager.update_endpoint(&key(), A).unwrap();
    manager.recover(&key()).await.unwrap();
    let generation = manager.info(&key()).unwrap().generation;

    let backend = connector.latest();
    backend.healthy.store(false, Ordering::SeqCst);
    wait_status(&manager, ConnectionStatus::Unstable).await;
    backend.healthy.store(true, Ordering::SeqCst);
    wait_status(&manager, ConnectionStatus::Connected).await;

    assert_eq!(manager.info(&key()).unwrap().generation, generation);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_close_starts_new_generation() {
    let connector = Arc::new(MockConnector::default());
    let manager = ConnectionManager::new(connector.clone(), config());
    manager.update_endpoint(&key(), A).unwrap();
    manager.recover(&key()).await.unwrap();
    let before = manager.readiness(&key()).unwrap();

    connector.latest().closed.send_replace(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(matches!(before.wait().await, Err(ChainError::Superseded)));
    manager.recover(&key()).await.unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiters_during_each_reconnect_see_success() {
    let connector = Arc::new(MockConnector::default().with(A, Behavior::SucceedAfter(Duration::from_secs(1))));
    let manager = ConnectionManager::new(connector.clone(), config());
    manager.update_endpoint(&key(), A).unwrap();
    manager.recover(&key()).await.unwrap();

    for cycle in 0..3u64 {
        let generation = manager.info(&key()).unwrap().generation;
        connector.latest().closed.send_replace(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_ne!(manager.status(&key()), ConnectionStatus::Connected);

        // Waiting starts while the new connection is still being made.
        manager.recover(&key()).await.unwrap();
        assert!(manager.info(&key()).unwrap().generation > generation);
        assert_eq!(manager.status(&key()), ConnectionStatus::Connected);
        assert_eq!(connector.connects.load(Ordering::SeqCst) as u64, cycle + 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_and_shutdown() {
    let connector = Arc::new(MockConnector::default());
    let manager = ConnectionManager::new(connector, config());
    manager.update_endpoint(&key(), A).unwrap();
    manager.recover(&key()).await.unwrap();

    assert!(manager.disconnect(&key()));
    assert_eq!(manager.status(&key()), ConnectionStatus::Disconnected);
    assert!(manager.try_backend(&key()).is_none());
    assert!(!manager.disconnect(&key()));

    manager.update_endpoint(&key(), B).unwrap();
    manager.recover(&key()).await.unwrap();
    assert_eq!(manager.list().len(), 1);

    manager.shutdown().await;
}
