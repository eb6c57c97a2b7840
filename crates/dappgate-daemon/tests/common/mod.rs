//! Shared harness for dispatcher and server tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dappgate::{Channel, ChannelKind, Dispatcher, EventType, InboundMessage, OutboundMessage, PushEvent, Services, WireError};
use dappgate::{ProviderError, TransactionService};
use dappgate_chain::{
    BackendConnector, ChainBackend, ChainError, ChainInfo, ChainMetadataSource, Endpoint,
};
use dappgate_core::{
    AccountList, Address, AppConfig, AuthorizeRequest, AuthorizeResult, ChainFamily,
    ConfirmationItem, ConfirmationKind, KeyType, Keyring, KeyringAccount, KeyringError,
    NetworkProposal, Origin, SignRequest, StaticKeyring, TransactionRequest,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "hunter2";
pub const SIGNATURE: &str = "0x5151";
pub const TX_HASH: &str = "0xfeed";

// ==================== Keyring ====================

/// Signs with a fixed signature once the right password is supplied.
pub struct TestKeyring {
    inner: StaticKeyring,
}

#[async_trait]
impl Keyring for TestKeyring {
    fn subscribe(&self) -> watch::Receiver<AccountList> {
        self.inner.subscribe()
    }

    async fn sign(&self, request: &SignRequest, password: Option<&str>) -> Result<String, KeyringError> {
        let account = self
            .find(&request.address)
            .ok_or_else(|| KeyringError::UnknownAccount(request.address.clone()))?;
        if account.external {
            return Err(KeyringError::ExternalAccount(account.address));
        }
        match password {
            Some(PASSWORD) => Ok(SIGNATURE.to_string()),
            _ => Err(KeyringError::InvalidPassword),
        }
    }
}

pub fn account(address: &str, key_type: KeyType, created_at: u64) -> KeyringAccount {
    KeyringAccount {
        address: Address::new(address),
        name: None,
        key_type,
        created_at,
        hidden: false,
        external: false,
    }
}

pub fn external(address: &str) -> KeyringAccount {
    KeyringAccount {
        external: true,
        ..account(address, KeyType::Ethereum, 1)
    }
}

// ==================== Chain doubles ====================

/// Node that knows `eth_chainId`, reverts `eth_call` and loses the
/// transport on `eth_getBalance`.
pub struct MockBackend;

#[async_trait]
impl ChainBackend for MockBackend {
    fn label(&self) -> &str {
        "mock"
    }

    async fn request(&self, method: &str, _params: Value) -> Result<Value, ChainError> {
        match method {
            "eth_chainId" => Ok(json!("0x1")),
            "eth_blockNumber" => Ok(json!("0x10")),
            "eth_call" => Err(ChainError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
                data: Some(json!("0x08c379a0")),
            }),
            "eth_getBalance" => Err(ChainError::Transport("connection reset".to_string())),
            _ => Ok(Value::Null),
        }
    }

    async fn closed(&self) {
        futures::future::pending::<()>().await
    }
}

/// Connects instantly, except to chains listed as unreachable.
#[derive(Default)]
pub struct MockConnector {
    unreachable: Mutex<HashSet<String>>,
}

impl MockConnector {
    pub fn unreachable(self, chain: &str) -> Self {
        if let Ok(mut set) = self.unreachable.lock() {
            set.insert(chain.to_string());
        }
        self
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainBackend>, ChainError> {
        let down = self
            .unreachable
            .lock()
            .map(|set| set.contains(&endpoint.chain))
            .unwrap_or(false);
        if down {
            return Err(ChainError::Connection("refused".to_string()));
        }
        Ok(Arc::new(MockBackend))
    }
}

/// Registry lookups always fail.
pub struct OfflineProbe;

#[async_trait]
impl ChainMetadataSource for OfflineProbe {
    async fn lookup(&self, _chain_id: u64) -> Result<NetworkProposal, ChainError> {
        Err(ChainError::Probe("registry offline".to_string()))
    }
}

/// Echoes drafts and accepts every submission.
#[derive(Default)]
pub struct RecordingTransactions {
    pub submitted: Mutex<Vec<String>>,
}

#[async_trait]
impl TransactionService for RecordingTransactions {
    async fn prepare(&self, chain: &ChainInfo, from: &Address, draft: Value) -> Result<TransactionRequest, ProviderError> {
        Ok(TransactionRequest {
            chain: chain.slug.clone(),
            from: from.clone(),
            draft,
            estimated_fee: Some("0x5208".to_string()),
        })
    }

    async fn submit(&self, _chain: &ChainInfo, signed: &str) -> Result<Value, ProviderError> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(signed.to_string());
        }
        Ok(json!(TX_HASH))
    }
}

// ==================== Harness ====================

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub transactions: Arc<RecordingTransactions>,
}

impl Harness {
    pub fn new(accounts: Vec<KeyringAccount>) -> Self {
        Self::with_connector(accounts, MockConnector::default())
    }

    pub fn with_connector(accounts: Vec<KeyringAccount>, connector: MockConnector) -> Self {
        let transactions = Arc::new(RecordingTransactions::default());
        let services = Services::builder(AppConfig::default())
            .keyring(Arc::new(TestKeyring {
                inner: StaticKeyring::new(accounts),
            }))
            .connector(Arc::new(connector))
            .probe(Arc::new(OfflineProbe))
            .transactions(transactions.clone())
            .build()
            .unwrap();
        Self {
            dispatcher: Arc::new(Dispatcher::new(Arc::new(services))),
            transactions,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        self.dispatcher.services()
    }

    pub fn page(&self, origin: &str) -> (Channel, mpsc::UnboundedReceiver<OutboundMessage>) {
        self.dispatcher.open_channel(ChannelKind::Page {
            origin: Origin::parse(origin).unwrap(),
            name: Some("Test dApp".to_string()),
        })
    }

    pub fn internal(&self) -> (Channel, mpsc::UnboundedReceiver<OutboundMessage>) {
        self.dispatcher.open_channel(ChannelKind::Internal)
    }

    pub async fn call(&self, channel: &Channel, message: &str, request: Value) -> OutboundMessage {
        self.dispatcher
            .handle(channel, InboundMessage::new("1", message, request))
            .await
    }

    /// Start a request that will wait on the user.
    pub fn spawn_call(&self, channel: &Channel, message: &str, request: Value) -> JoinHandle<OutboundMessage> {
        let dispatcher = self.dispatcher.clone();
        let channel = channel.clone();
        let message = InboundMessage::new("1", message, request);
        tokio::spawn(async move { dispatcher.handle(&channel, message).await })
    }

    pub async fn evm(&self, channel: &Channel, method: &str, params: Value) -> OutboundMessage {
        self.call(channel, "evm(request)", json!({ "method": method, "params": params }))
            .await
    }

    pub fn spawn_evm(&self, channel: &Channel, method: &str, params: Value) -> JoinHandle<OutboundMessage> {
        self.spawn_call(channel, "evm(request)", json!({ "method": method, "params": params }))
    }

    pub async fn next_authorize(&self) -> AuthorizeRequest {
        let mut pending = self.services().queue.subscribe();
        let snapshot = pending.wait_for(|p| !p.authorize.is_empty()).await.unwrap();
        snapshot.authorize[0].clone()
    }

    pub async fn next_confirmation(&self, kind: ConfirmationKind) -> ConfirmationItem {
        let mut pending = self.services().queue.subscribe();
        let snapshot = pending
            .wait_for(|p| p.confirmations.get(&kind).is_some_and(|items| !items.is_empty()))
            .await
            .unwrap();
        snapshot.confirmations[&kind][0].clone()
    }

    /// Run the authorization handshake, approving `selected`.
    pub async fn authorize(&self, channel: &Channel, families: &[ChainFamily], selected: &[&str]) {
        let call = self.spawn_call(channel, "pub(authorize.tab)", json!({ "families": families }));
        let request = self.next_authorize().await;
        self.services()
            .queue
            .resolve_authorize(AuthorizeResult {
                id: request.id,
                is_approved: true,
                accounts: selected.iter().map(|a| Address::new(*a)).collect(),
            })
            .unwrap();
        assert_eq!(result(call.await.unwrap()), json!(true));
    }
}

// ==================== Assertions ====================

pub fn result(message: OutboundMessage) -> Value {
    match message {
        OutboundMessage::Response { result, .. } => result,
        other => panic!("expected a response, got {:?}", other),
    }
}

pub fn error(message: OutboundMessage) -> WireError {
    match message {
        OutboundMessage::Error { error, .. } => error,
        other => panic!("expected an error, got {:?}", other),
    }
}

/// Next push of `kind`, skipping other events.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>, kind: EventType) -> (String, Value) {
    loop {
        match rx.recv().await {
            Some(OutboundMessage::Event {
                subscription_id,
                event: PushEvent { kind: k, payload },
            }) if k == kind => return (subscription_id, payload),
            Some(_) => continue,
            None => panic!("channel closed while waiting for {:?}", kind),
        }
    }
}

pub fn addresses(accounts: &Value) -> Vec<String> {
    accounts
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["address"].as_str().unwrap().to_string())
        .collect()
}
