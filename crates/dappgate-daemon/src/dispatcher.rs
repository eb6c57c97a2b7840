//! Request dispatcher.
//!
//! Page requests go through the phishing check, parsing, the preflight
//! lane, the authorization gate and routing, in that order. Internal
//! requests from the wallet UI skip the page gates.

use crate::adapters::{CardanoAdapter, EvmAdapter, SubstrateAdapter};
use crate::channel::{Channel, ChannelKind};
use crate::context::Services;
use crate::error::ProviderError;
use crate::fanout::push;
use crate::phishing::Verdict;
use crate::protocol::{EventType, InboundMessage, OutboundMessage};
use crate::request::{
    AccountsParams, AuthorizeTabParams, InternalRequest, OverrideAction, PageRequest, family_of,
};
use dappgate_chain::ConnectionKey;
use dappgate_core::{AuthRecord, ChainFamily, ChainSlug, Origin, RequestId};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub struct Dispatcher {
    services: Arc<Services>,
    evm: EvmAdapter,
    substrate: SubstrateAdapter,
    cardano: CardanoAdapter,
    next_channel: AtomicU64,
}

impl Dispatcher {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            evm: EvmAdapter::new(services.clone()),
            substrate: SubstrateAdapter::new(services.clone()),
            cardano: CardanoAdapter::new(services.clone()),
            services,
            next_channel: AtomicU64::new(1),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn open_channel(&self, kind: ChannelKind) -> (Channel, mpsc::UnboundedReceiver<OutboundMessage>) {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        match &kind {
            ChannelKind::Page { origin, .. } => tracing::info!("Channel {} opened by {}", id, origin),
            ChannelKind::Internal => tracing::info!("Channel {} opened by the wallet UI", id),
        }
        Channel::new(id, kind)
    }

    /// Tear down every subscription of a channel. In-flight requests keep
    /// running; their answers are dropped.
    pub fn close_channel(&self, channel: &Channel) -> usize {
        let closed = self.services.hub.close_channel(channel.id());
        tracing::info!("Channel {} closed", channel.id());
        closed
    }

    /// Handle one message and send the answer on its channel.
    pub async fn dispatch(&self, channel: &Channel, message: InboundMessage) {
        let answer = self.handle(channel, message).await;
        channel.send(answer);
    }

    /// Handle one message and return the answer.
    pub async fn handle(&self, channel: &Channel, message: InboundMessage) -> OutboundMessage {
        let InboundMessage { id, message, request } = message;
        match channel.kind() {
            ChannelKind::Page { origin, .. } => self.handle_page(channel, origin, id, &message, request).await,
            ChannelKind::Internal => {
                let result = match InternalRequest::parse(&message, request) {
                    Ok(req) => self.handle_internal(channel, req).await,
                    Err(e) => Err(e),
                };
                respond(id, result, None)
            }
        }
    }

    // ==================== Page requests ====================

    async fn handle_page(
        &self,
        channel: &Channel,
        origin: &Origin,
        id: RequestId,
        message: &str,
        payload: Value,
    ) -> OutboundMessage {
        if let Verdict::Blocked { redirect } = self.services.phishing.check(origin) {
            return OutboundMessage::Redirect { id, url: redirect };
        }

        let family = family_of(message);
        let request = match PageRequest::parse(message, payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("{} sent an invalid {}: {}", origin, message, e);
                return respond(id, Err(e), family);
            }
        };

        if let Some(required) = request.required_family() {
            let granted = self
                .services
                .registry
                .get_auth_record(origin)
                .is_some_and(|r| r.has_family(required));
            if !granted {
                tracing::debug!("{} is not authorized for {}", origin, required);
                return respond(id, Err(ProviderError::Unauthorized), family);
            }
        }

        let family = match &request {
            PageRequest::AuthorizeTab(p) => p.families.first().copied(),
            _ => family,
        };
        let result = self.route(channel, origin, request).await;
        respond(id, result, family)
    }

    async fn route(&self, channel: &Channel, origin: &Origin, request: PageRequest) -> Result<Value, ProviderError> {
        match request {
            PageRequest::Ping => Ok(json!(true)),
            PageRequest::AuthorizeTab(params) => self.authorize_tab(channel, origin, params).await,
            PageRequest::AccountsList(params) => {
                let accounts = self
                    .services
                    .registry
                    .list_accounts_for(origin, &params.families, params.any_type);
                Ok(json!(accounts))
            }
            PageRequest::AccountsSubscribe(params) => self.subscribe_accounts(channel, origin, params),
            PageRequest::AccountsUnsubscribe(params) => {
                Ok(json!(self.services.hub.unsubscribe(channel.id(), &params.subscription_id)))
            }
            PageRequest::Evm(request) => self.evm.handle(channel, origin, request).await,
            PageRequest::EvmEventsSubscribe => self.evm.subscribe_events(channel, origin),
            PageRequest::Substrate(request) => self.substrate.handle(origin, request).await,
            PageRequest::Cardano(request) => self.cardano.handle(origin, channel.name(), request).await,
        }
    }

    async fn authorize_tab(
        &self,
        channel: &Channel,
        origin: &Origin,
        params: AuthorizeTabParams,
    ) -> Result<Value, ProviderError> {
        let name = params.name.or_else(|| channel.name().map(str::to_string));
        let granted = self
            .services
            .registry
            .authorize(origin, name, &params.families, params.reconfirm)
            .await?;
        if !granted {
            return Err(ProviderError::UserRejected);
        }
        Ok(json!(true))
    }

    /// Push the visible account list now and on every change.
    fn subscribe_accounts(
        &self,
        channel: &Channel,
        origin: &Origin,
        params: AccountsParams,
    ) -> Result<Value, ProviderError> {
        let services = self.services.clone();
        let origin = origin.clone();
        let id = self
            .services
            .hub
            .spawn_subscription(channel, move |id, channel, _| async move {
                let mut records = services.registry.subscribe();
                let mut keyring = services.registry.keyring().subscribe();
                let mut last = None;
                loop {
                    let accounts = services
                        .registry
                        .list_accounts_for(&origin, &params.families, params.any_type);
                    if last.as_ref() != Some(&accounts) {
                        if !push(&channel, &id, EventType::AccountsChanged, json!(accounts)) {
                            break;
                        }
                        last = Some(accounts);
                    }
                    let alive = tokio::select! {
                        changed = records.changed() => changed.is_ok(),
                        changed = keyring.changed() => changed.is_ok(),
                    };
                    if !alive {
                        break;
                    }
                }
            })
            .ok_or(ProviderError::Disconnected)?;
        Ok(json!(id))
    }

    // ==================== Internal requests ====================

    async fn handle_internal(&self, channel: &Channel, request: InternalRequest) -> Result<Value, ProviderError> {
        let services = &self.services;
        match request {
            InternalRequest::AuthorizeList => {
                let records = services.registry.snapshot();
                let records: Vec<&AuthRecord> = records.iter().map(|r| r.as_ref()).collect();
                Ok(json!(records))
            }
            InternalRequest::AuthorizeSetAddresses {
                origin,
                family,
                addresses,
            } => {
                services.registry.set_allowed_addresses(&origin, family, &addresses)?;
                Ok(json!(true))
            }
            InternalRequest::AuthorizeRevokeFamily { origin, family } => {
                services.registry.revoke_family(&origin, family)?;
                Ok(json!(true))
            }
            InternalRequest::AuthorizeForget { origin } => Ok(json!(services.registry.forget(&origin))),
            InternalRequest::AuthorizeResolve(result) => {
                services.queue.resolve_authorize(result)?;
                Ok(json!(true))
            }
            InternalRequest::ConfirmationsSubscribe => self.subscribe_confirmations(channel),
            InternalRequest::ConfirmationsResolve(result) => {
                let id = result.id.clone();
                services.queue.resolve(&id, result)?;
                Ok(json!(true))
            }
            InternalRequest::ConnectionStatus => Ok(json!(services.connections.list())),
            InternalRequest::ConnectionUpdateEndpoint { chain, url } => self.update_endpoint(chain, url),
            InternalRequest::PhishingOverride { host, action } => {
                match action {
                    OverrideAction::Allow => services.phishing.allow(&host),
                    OverrideAction::Deny => services.phishing.deny(&host),
                    OverrideAction::Clear => services.phishing.clear_override(&host),
                }
                Ok(json!(true))
            }
        }
    }

    fn subscribe_confirmations(&self, channel: &Channel) -> Result<Value, ProviderError> {
        let mut pending = self.services.queue.subscribe();
        let id = self
            .services
            .hub
            .spawn_subscription(channel, move |id, channel, _| async move {
                loop {
                    let snapshot = pending.borrow_and_update().clone();
                    if !push(&channel, &id, EventType::Data, json!(snapshot.as_ref())) {
                        break;
                    }
                    if pending.changed().await.is_err() {
                        break;
                    }
                }
            })
            .ok_or(ProviderError::Disconnected)?;
        Ok(json!(id))
    }

    /// Point a chain at a new endpoint. The old connection is replaced, never patched.
    fn update_endpoint(&self, slug: ChainSlug, url: String) -> Result<Value, ProviderError> {
        let services = &self.services;
        let chain = services
            .chains
            .get(&slug)
            .ok_or_else(|| ProviderError::UnrecognizedChain(slug.clone()))?;
        let key = ConnectionKey::new(slug, chain.family);
        let changed = services.connections.update_endpoint(&key, &url)?;

        let mut updated = (*chain).clone();
        updated.rpc_urls.retain(|u| u != &url);
        updated.rpc_urls.insert(0, url);
        services.chains.upsert(updated);
        Ok(json!(changed))
    }
}

fn respond(id: RequestId, result: Result<Value, ProviderError>, family: Option<ChainFamily>) -> OutboundMessage {
    match result {
        Ok(result) => OutboundMessage::Response { id, result },
        Err(e) => {
            if matches!(e, ProviderError::Internal(_)) {
                tracing::warn!("Request {} failed: {}", id, e);
            }
            OutboundMessage::Error {
                id,
                error: e.to_wire(family),
            }
        }
    }
}
