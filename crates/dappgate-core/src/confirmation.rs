//! Confirmation queue.
//!
//! Sensitive operations park a confirmation item here and await the UI's
//! decision. Items accumulate per kind in arrival order; the UI observes the
//! pending set through a watch channel and resolves each item exactly once.
//!
//! Nothing in the queue times out. A caller that needs a bounded wait wraps
//! [`PendingConfirmation::resolution`] in its own timeout.

use crate::origin::Origin;
use crate::types::{Address, ChainFamily, ChainSlug, KeyringAccount, RequestId, SignRequest, now_ms};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Confirmation {0} is already pending")]
    Duplicate(RequestId),

    #[error("No pending confirmation with id {0}")]
    NotPending(RequestId),

    #[error("Result id {got} does not match confirmation {expected}")]
    IdMismatch { expected: RequestId, got: RequestId },

    #[error("Confirmation {0} was abandoned before resolution")]
    Abandoned(RequestId),

    #[error("Invalid confirmation response for {0}: {1}")]
    InvalidResponse(RequestId, String),

    #[error("Queue state poisoned")]
    Poisoned,
}

/// Closed set of confirmation kinds understood by pages and the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmationKind {
    AddNetwork,
    AddToken,
    SwitchNetwork,
    SignatureRequest,
    SignatureRequestExternal,
    SendTransactionRequest,
    SendTransactionRequestExternal,
}

impl ConfirmationKind {
    pub fn all() -> &'static [ConfirmationKind] {
        &[
            ConfirmationKind::AddNetwork,
            ConfirmationKind::AddToken,
            ConfirmationKind::SwitchNetwork,
            ConfirmationKind::SignatureRequest,
            ConfirmationKind::SignatureRequestExternal,
            ConfirmationKind::SendTransactionRequest,
            ConfirmationKind::SendTransactionRequestExternal,
        ]
    }
}

// ==================== Payloads ====================

/// Network proposed by a page, pre-populated from probed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProposal {
    pub family: ChainFamily,
    #[serde(default)]
    pub evm_chain_id: Option<u64>,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
    pub native_symbol: String,
    pub native_decimals: u8,
}

/// Token proposed through `wallet_watchAsset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenProposal {
    pub chain: ChainSlug,
    pub contract_address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchNetworkRequest {
    pub chain: ChainSlug,
    pub chain_name: String,
    #[serde(default)]
    pub evm_chain_id: Option<u64>,
}

/// Transaction awaiting approval, as returned by the construction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub chain: ChainSlug,
    pub from: Address,
    pub draft: serde_json::Value,
    #[serde(default)]
    pub estimated_fee: Option<String>,
}

/// Tagged payload stored in the queue and rendered by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum ConfirmationPayload {
    AddNetwork(NetworkProposal),
    AddToken(TokenProposal),
    SwitchNetwork(SwitchNetworkRequest),
    SignatureRequest(SignRequest),
    SignatureRequestExternal(SignRequest),
    SendTransactionRequest(TransactionRequest),
    SendTransactionRequestExternal(TransactionRequest),
}

impl ConfirmationPayload {
    pub fn kind(&self) -> ConfirmationKind {
        match self {
            ConfirmationPayload::AddNetwork(_) => ConfirmationKind::AddNetwork,
            ConfirmationPayload::AddToken(_) => ConfirmationKind::AddToken,
            ConfirmationPayload::SwitchNetwork(_) => ConfirmationKind::SwitchNetwork,
            ConfirmationPayload::SignatureRequest(_) => ConfirmationKind::SignatureRequest,
            ConfirmationPayload::SignatureRequestExternal(_) => {
                ConfirmationKind::SignatureRequestExternal
            }
            ConfirmationPayload::SendTransactionRequest(_) => {
                ConfirmationKind::SendTransactionRequest
            }
            ConfirmationPayload::SendTransactionRequestExternal(_) => {
                ConfirmationKind::SendTransactionRequestExternal
            }
        }
    }
}

/// Pairs a confirmation kind with its payload and response types.
pub trait Confirmation: Send + 'static {
    const KIND: ConfirmationKind;
    type Payload: Clone + Send + 'static;
    type Response: DeserializeOwned + Send + 'static;

    fn wrap(payload: Self::Payload) -> ConfirmationPayload;
}

macro_rules! confirmation_kind {
    ($($marker:ident => $payload:ty, $response:ty;)+) => {
        $(
            pub struct $marker;

            impl Confirmation for $marker {
                const KIND: ConfirmationKind = ConfirmationKind::$marker;
                type Payload = $payload;
                type Response = $response;

                fn wrap(payload: Self::Payload) -> ConfirmationPayload {
                    ConfirmationPayload::$marker(payload)
                }
            }
        )+
    };
}

/// Marker types, one per [`ConfirmationKind`].
pub mod kind {
    use super::*;

    confirmation_kind! {
        AddNetwork => NetworkProposal, NetworkProposal;
        AddToken => TokenProposal, TokenProposal;
        SwitchNetwork => SwitchNetworkRequest, ();
        SignatureRequest => SignRequest, ();
        SignatureRequestExternal => SignRequest, ();
        SendTransactionRequest => TransactionRequest, ();
        SendTransactionRequestExternal => TransactionRequest, ();
    }
}

// ==================== Items and results ====================

#[derive(Debug, Clone, Default)]
pub struct ConfirmationOptions {
    pub required_password: bool,
    pub address: Option<Address>,
    pub chain: Option<ChainSlug>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationItem {
    pub id: RequestId,
    pub origin: Origin,
    pub kind: ConfirmationKind,
    pub payload: ConfirmationPayload,
    pub required_password: bool,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub chain: Option<ChainSlug>,
    pub created_at: u64,
}

/// UI decision for one confirmation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult<T> {
    pub id: RequestId,
    pub is_approved: bool,
    #[serde(default)]
    pub payload: Option<T>,
    #[serde(default)]
    pub password: Option<String>,
    /// Hex encoded signature from an external signer.
    #[serde(default)]
    pub signature: Option<String>,
}

impl<T> ConfirmationResult<T> {
    pub fn rejected(id: impl Into<RequestId>) -> Self {
        Self {
            id: id.into(),
            is_approved: false,
            payload: None,
            password: None,
            signature: None,
        }
    }

    pub fn approved(id: impl Into<RequestId>) -> Self {
        Self {
            is_approved: true,
            ..Self::rejected(id)
        }
    }
}

/// Authorization handshake awaiting the user's account selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id: RequestId,
    pub origin: Origin,
    #[serde(default)]
    pub name: Option<String>,
    pub families: Vec<ChainFamily>,
    /// Accounts offered for selection.
    pub accounts: Vec<KeyringAccount>,
    pub reconfirm: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResult {
    pub id: RequestId,
    pub is_approved: bool,
    #[serde(default)]
    pub accounts: Vec<Address>,
}

/// Everything the UI has to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSnapshot {
    pub authorize: Vec<AuthorizeRequest>,
    pub confirmations: BTreeMap<ConfirmationKind, Vec<ConfirmationItem>>,
}

impl PendingSnapshot {
    pub fn len(&self) -> usize {
        self.authorize.len() + self.confirmations.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, id: &str) -> Option<&ConfirmationItem> {
        self.confirmations
            .values()
            .flat_map(|items| items.iter())
            .find(|item| item.id == id)
    }
}

// ==================== Queue ====================

enum Waiter {
    Confirmation(ConfirmationKind, oneshot::Sender<ConfirmationResult<serde_json::Value>>),
    Authorize(oneshot::Sender<AuthorizeResult>),
}

#[derive(Default)]
struct QueueState {
    pending: PendingSnapshot,
    waiters: HashMap<RequestId, Waiter>,
}

/// Keyed collections of pending approval items.
#[derive(Clone)]
pub struct ConfirmationQueue {
    state: Arc<Mutex<QueueState>>,
    snapshot: Arc<watch::Sender<Arc<PendingSnapshot>>>,
}

impl Default for ConfirmationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationQueue {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(PendingSnapshot::default()));
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            snapshot: Arc::new(tx),
        }
    }

    /// Queue a confirmation under a fresh id.
    pub fn enqueue<K: Confirmation>(
        &self,
        origin: Origin,
        payload: K::Payload,
        options: ConfirmationOptions,
    ) -> Result<PendingConfirmation<K>, QueueError> {
        self.enqueue_with_id::<K>(uuid::Uuid::new_v4().to_string(), origin, payload, options)
    }

    /// Queue a confirmation under a caller-chosen id. Only one live item may use an id.
    pub fn enqueue_with_id<K: Confirmation>(
        &self,
        id: RequestId,
        origin: Origin,
        payload: K::Payload,
        options: ConfirmationOptions,
    ) -> Result<PendingConfirmation<K>, QueueError> {
        let (tx, rx) = oneshot::channel();
        let item = ConfirmationItem {
            id: id.clone(),
            origin,
            kind: K::KIND,
            payload: K::wrap(payload),
            required_password: options.required_password,
            address: options.address,
            chain: options.chain,
            created_at: now_ms(),
        };

        {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            if state.waiters.contains_key(&id) {
                return Err(QueueError::Duplicate(id));
            }
            state.waiters.insert(id.clone(), Waiter::Confirmation(K::KIND, tx));
            state.pending.confirmations.entry(K::KIND).or_default().push(item);
            self.publish(&state);
        }

        tracing::debug!("Queued {:?} confirmation {}", K::KIND, id);
        Ok(PendingConfirmation {
            id,
            rx,
            _kind: PhantomData,
        })
    }

    /// Deliver the UI's decision. Succeeds at most once per id.
    pub fn resolve(
        &self,
        id: &str,
        result: ConfirmationResult<serde_json::Value>,
    ) -> Result<(), QueueError> {
        if result.id != id {
            return Err(QueueError::IdMismatch {
                expected: id.to_string(),
                got: result.id,
            });
        }

        let sender = {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            let kind = match state.waiters.get(id) {
                Some(Waiter::Confirmation(kind, _)) => *kind,
                _ => return Err(QueueError::NotPending(id.to_string())),
            };
            let Some(Waiter::Confirmation(_, sender)) = state.waiters.remove(id) else {
                return Err(QueueError::NotPending(id.to_string()));
            };
            if let Some(items) = state.pending.confirmations.get_mut(&kind) {
                items.retain(|item| item.id != id);
                if items.is_empty() {
                    state.pending.confirmations.remove(&kind);
                }
            }
            self.publish(&state);
            sender
        };

        tracing::debug!(
            "Resolved confirmation {} (approved: {})",
            id,
            result.is_approved
        );
        if sender.send(result).is_err() {
            tracing::debug!("Requester for confirmation {} is gone", id);
        }
        Ok(())
    }

    /// Queue an authorization handshake.
    pub fn enqueue_authorize(
        &self,
        origin: Origin,
        name: Option<String>,
        families: Vec<ChainFamily>,
        accounts: Vec<KeyringAccount>,
        reconfirm: bool,
    ) -> Result<PendingAuthorization, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let request = AuthorizeRequest {
            id: id.clone(),
            origin,
            name,
            families,
            accounts,
            reconfirm,
            created_at: now_ms(),
        };

        {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            state.waiters.insert(id.clone(), Waiter::Authorize(tx));
            state.pending.authorize.push(request);
            self.publish(&state);
        }

        tracing::debug!("Queued authorization request {}", id);
        Ok(PendingAuthorization { id, rx })
    }

    /// Deliver the UI's answer to an authorization handshake.
    pub fn resolve_authorize(&self, result: AuthorizeResult) -> Result<(), QueueError> {
        let sender = {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            if !matches!(state.waiters.get(&result.id), Some(Waiter::Authorize(_))) {
                return Err(QueueError::NotPending(result.id));
            }
            let Some(Waiter::Authorize(sender)) = state.waiters.remove(&result.id) else {
                return Err(QueueError::NotPending(result.id));
            };
            state.pending.authorize.retain(|r| r.id != result.id);
            self.publish(&state);
            sender
        };

        let id = result.id.clone();
        if sender.send(result).is_err() {
            tracing::debug!("Requester for authorization {} is gone", id);
        }
        Ok(())
    }

    /// Current pending set.
    pub fn list_pending(&self) -> Arc<PendingSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Observe the pending set.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PendingSnapshot>> {
        self.snapshot.subscribe()
    }

    fn publish(&self, state: &QueueState) {
        self.snapshot.send_replace(Arc::new(state.pending.clone()));
    }
}

/// Handle returned by [`ConfirmationQueue::enqueue`].
pub struct PendingConfirmation<K: Confirmation> {
    id: RequestId,
    rx: oneshot::Receiver<ConfirmationResult<serde_json::Value>>,
    _kind: PhantomData<K>,
}

impl<K: Confirmation> PendingConfirmation<K> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the UI's decision. A rejection is an ordinary result, not an error.
    pub async fn resolution(self) -> Result<ConfirmationResult<K::Response>, QueueError> {
        let id = self.id;
        let raw = self.rx.await.map_err(|_| QueueError::Abandoned(id.clone()))?;
        let payload = match raw.payload {
            Some(value) if raw.is_approved => Some(
                serde_json::from_value(value)
                    .map_err(|e| QueueError::InvalidResponse(id.clone(), e.to_string()))?,
            ),
            _ => None,
        };
        Ok(ConfirmationResult {
            id: raw.id,
            is_approved: raw.is_approved,
            payload,
            password: raw.password,
            signature: raw.signature,
        })
    }
}

/// Handle returned by [`ConfirmationQueue::enqueue_authorize`].
pub struct PendingAuthorization {
    id: RequestId,
    rx: oneshot::Receiver<AuthorizeResult>,
}

impl PendingAuthorization {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn resolution(self) -> Result<AuthorizeResult, QueueError> {
        self.rx.await.map_err(|_| QueueError::Abandoned(self.id))
    }
}
