//! EIP-1193 provider for EVM chains.

use super::{
    allowed_account, backend_for, current_chain, permitted_accounts, revealing_backend,
    sign_with_confirmation,
};
use crate::channel::Channel;
use crate::context::Services;
use crate::error::{EIP1193_DISCONNECTED, ProviderError};
use crate::fanout::{LivenessTracker, push};
use crate::protocol::EventType;
use crate::request::{AddChainParams, EvmRequest, WatchAssetParams};
use dappgate_chain::{ChainInfo, ConnectionKey};
use dappgate_core::{
    Address, ChainFamily, ConfirmationOptions, NetworkProposal, Origin, SignMethod, SignRequest,
    SwitchNetworkRequest, TokenProposal, kind,
};
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;

const FAMILY: ChainFamily = ChainFamily::Evm;

pub struct EvmAdapter {
    services: Arc<Services>,
}

impl EvmAdapter {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn handle(
        &self,
        channel: &Channel,
        origin: &Origin,
        request: EvmRequest,
    ) -> Result<Value, ProviderError> {
        match request {
            EvmRequest::RequestAccounts => {
                self.connect(origin, channel.name()).await?;
                Ok(json!(permitted_accounts(&self.services, origin, FAMILY)))
            }
            EvmRequest::Accounts => Ok(json!(self.accounts(origin))),
            EvmRequest::RequestPermissions => {
                self.connect(origin, channel.name()).await?;
                Ok(self.permissions(origin))
            }
            EvmRequest::GetPermissions => Ok(self.permissions(origin)),
            EvmRequest::ChainId => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                Ok(json!(chain_id_hex(&chain)?))
            }
            EvmRequest::NetVersion => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                let id = chain
                    .evm_chain_id
                    .ok_or_else(|| ProviderError::UnrecognizedChain(chain.slug.clone()))?;
                Ok(json!(id.to_string()))
            }
            EvmRequest::SwitchChain { chain_id } => {
                self.switch_chain(origin, chain_id).await?;
                Ok(Value::Null)
            }
            EvmRequest::AddChain { chain_id, params } => {
                self.add_chain(origin, chain_id, params).await?;
                Ok(Value::Null)
            }
            EvmRequest::WatchAsset(asset) => self.watch_asset(origin, asset).await,
            EvmRequest::PersonalSign { address, message } => {
                self.sign(origin, address, SignMethod::PersonalSign, json!({ "message": message }))
                    .await
            }
            EvmRequest::EthSign { address, message } => {
                self.sign(origin, address, SignMethod::EthSign, json!({ "message": message }))
                    .await
            }
            EvmRequest::SignTypedDataV4 { address, typed_data } => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                check_typed_data_chain(&typed_data, &chain)?;
                self.sign(origin, address, SignMethod::TypedDataV4, typed_data).await
            }
            EvmRequest::SendTransaction { from, tx } => self.send_transaction(origin, from, tx).await,
            EvmRequest::Subscribe { params } => self.subscribe(channel, origin, params).await,
            EvmRequest::Unsubscribe { subscription_id } => {
                Ok(json!(self.services.hub.unsubscribe(channel.id(), &subscription_id)))
            }
            EvmRequest::Passthrough { method, params } => {
                let chain = current_chain(&self.services, origin, FAMILY)?;
                let backend = backend_for(&self.services, &chain).await?;
                tracing::debug!("{} -> {} {}", origin, chain.slug, method);
                Ok(backend.request(&method, params).await?)
            }
        }
    }

    // ==================== Accounts ====================

    async fn connect(&self, origin: &Origin, name: Option<&str>) -> Result<(), ProviderError> {
        let granted = self
            .services
            .registry
            .authorize(origin, name.map(str::to_string), &[FAMILY], false)
            .await?;
        if granted {
            Ok(())
        } else {
            Err(ProviderError::UserRejected)
        }
    }

    fn accounts(&self, origin: &Origin) -> Vec<Address> {
        let granted = self
            .services
            .registry
            .get_auth_record(origin)
            .is_some_and(|r| r.has_family(FAMILY));
        if granted {
            permitted_accounts(&self.services, origin, FAMILY)
        } else {
            Vec::new()
        }
    }

    fn permissions(&self, origin: &Origin) -> Value {
        let accounts = self.accounts(origin);
        if accounts.is_empty() {
            return json!([]);
        }
        json!([{
            "parentCapability": "eth_accounts",
            "invoker": origin.as_str(),
            "caveats": [{ "type": "restrictReturnedAccounts", "value": accounts }],
        }])
    }

    // ==================== Networks ====================

    /// Make `chain_id` the origin's current chain.
    ///
    /// Known active chains switch directly, known inactive chains need a
    /// switch confirmation, unknown chains are looked up and offered as a
    /// new network.
    async fn switch_chain(&self, origin: &Origin, chain_id: u64) -> Result<(), ProviderError> {
        if let Some(chain) = self.services.chains.by_evm_chain_id(chain_id) {
            if !chain.active {
                let request = SwitchNetworkRequest {
                    chain: chain.slug.clone(),
                    chain_name: chain.name.clone(),
                    evm_chain_id: Some(chain_id),
                };
                let pending = self.services.queue.enqueue::<kind::SwitchNetwork>(
                    origin.clone(),
                    request,
                    ConfirmationOptions {
                        chain: Some(chain.slug.clone()),
                        ..Default::default()
                    },
                )?;
                if !pending.resolution().await?.is_approved {
                    return Err(ProviderError::UserRejected);
                }
                self.services.chains.set_active(&chain.slug, true);
            }
            return self.select(origin, &chain);
        }

        let proposal = self.services.probe.lookup(chain_id).await.map_err(|e| {
            tracing::info!("Chain 0x{:x} requested by {} is unknown: {}", chain_id, origin, e);
            ProviderError::NetworkNotSupported(format!("0x{:x}", chain_id))
        })?;
        self.propose_network(origin, proposal).await
    }

    /// EIP-3085. A chain we already know is switched to instead of added.
    async fn add_chain(
        &self,
        origin: &Origin,
        chain_id: u64,
        params: AddChainParams,
    ) -> Result<(), ProviderError> {
        if self.services.chains.by_evm_chain_id(chain_id).is_some() {
            return self.switch_chain(origin, chain_id).await;
        }
        let proposal = NetworkProposal {
            family: FAMILY,
            evm_chain_id: Some(chain_id),
            chain_name: params.chain_name,
            rpc_urls: params.rpc_urls,
            block_explorer_urls: params.block_explorer_urls.unwrap_or_default(),
            native_symbol: params.native_currency.symbol,
            native_decimals: params.native_currency.decimals,
        };
        self.propose_network(origin, proposal).await
    }

    async fn propose_network(&self, origin: &Origin, proposal: NetworkProposal) -> Result<(), ProviderError> {
        let pending = self.services.queue.enqueue::<kind::AddNetwork>(
            origin.clone(),
            proposal.clone(),
            ConfirmationOptions::default(),
        )?;
        let result = pending.resolution().await?;
        if !result.is_approved {
            return Err(ProviderError::UserRejected);
        }
        // The UI may have edited the proposal, e.g. picked another endpoint.
        let approved = result.payload.unwrap_or(proposal);
        if approved.rpc_urls.is_empty() {
            return Err(ProviderError::InvalidParams("network has no RPC endpoint".to_string()));
        }
        let chain = self.services.chains.add_from_proposal(&approved);
        self.select(origin, &chain)
    }

    fn select(&self, origin: &Origin, chain: &ChainInfo) -> Result<(), ProviderError> {
        self.services
            .registry
            .set_current_chain(origin, FAMILY, chain.slug.clone())?;
        if let Err(e) = self.services.connect_chain(chain) {
            tracing::warn!("Switched {} to {} without a connection: {}", origin, chain.slug, e);
        }
        tracing::info!("{} switched to {}", origin, chain.slug);
        Ok(())
    }

    /// EIP-747.
    async fn watch_asset(&self, origin: &Origin, asset: WatchAssetParams) -> Result<Value, ProviderError> {
        let chain = current_chain(&self.services, origin, FAMILY)?;
        let proposal = TokenProposal {
            chain: chain.slug.clone(),
            contract_address: Address::new(asset.options.address),
            symbol: asset.options.symbol,
            decimals: asset.options.decimals,
            image: asset.options.image,
        };
        let pending = self.services.queue.enqueue::<kind::AddToken>(
            origin.clone(),
            proposal.clone(),
            ConfirmationOptions {
                chain: Some(chain.slug.clone()),
                ..Default::default()
            },
        )?;
        let result = pending.resolution().await?;
        if !result.is_approved {
            return Err(ProviderError::UserRejected);
        }
        let token = result.payload.unwrap_or(proposal);
        self.services.chains.add_token(token.into());
        Ok(json!(true))
    }

    // ==================== Signing ====================

    async fn sign(
        &self,
        origin: &Origin,
        address: Address,
        method: SignMethod,
        data: Value,
    ) -> Result<Value, ProviderError> {
        let chain = current_chain(&self.services, origin, FAMILY)?;
        let request = SignRequest {
            address,
            method,
            chain: Some(chain.slug.clone()),
            data,
        };
        Ok(json!(sign_with_confirmation(&self.services, origin, request).await?))
    }

    async fn send_transaction(&self, origin: &Origin, from: Address, tx: Value) -> Result<Value, ProviderError> {
        let account = allowed_account(&self.services, origin, FAMILY, &from)?;
        let chain = current_chain(&self.services, origin, FAMILY)?;
        if let Some(requested) = tx.get("chainId").and_then(Value::as_str)
            && Some(requested.to_lowercase()) != chain.evm_chain_id_hex()
        {
            return Err(ProviderError::InvalidParams(format!(
                "transaction is for chain {} but {} is selected",
                requested, chain.slug
            )));
        }

        let prepared = self.services.transactions.prepare(&chain, &from, tx).await?;
        let options = ConfirmationOptions {
            required_password: !account.external,
            address: Some(from.clone()),
            chain: Some(chain.slug.clone()),
        };

        let signed = if account.external {
            let pending = self.services.queue.enqueue::<kind::SendTransactionRequestExternal>(
                origin.clone(),
                prepared,
                options,
            )?;
            let result = pending.resolution().await?;
            if !result.is_approved {
                return Err(ProviderError::UserRejected);
            }
            result
                .signature
                .ok_or_else(|| ProviderError::Internal("approval carried no signed transaction".to_string()))?
        } else {
            let pending = self.services.queue.enqueue::<kind::SendTransactionRequest>(
                origin.clone(),
                prepared.clone(),
                options,
            )?;
            let result = pending.resolution().await?;
            if !result.is_approved {
                return Err(ProviderError::UserRejected);
            }
            let request = SignRequest {
                address: from,
                method: SignMethod::EvmTransaction,
                chain: Some(chain.slug.clone()),
                data: prepared.draft,
            };
            self.services
                .registry
                .keyring()
                .sign(&request, result.password.as_deref())
                .await?
        };

        self.services.transactions.submit(&chain, &signed).await
    }

    // ==================== Subscriptions ====================

    /// `eth_subscribe`, forwarded to a push-capable backend.
    async fn subscribe(&self, channel: &Channel, origin: &Origin, params: Vec<Value>) -> Result<Value, ProviderError> {
        let chain = current_chain(&self.services, origin, FAMILY)?;
        let backend = revealing_backend(&self.services, &chain).await?;
        if !backend.supports_push() {
            return Err(ProviderError::Unsupported("eth_subscribe".to_string()));
        }
        let mut stream = backend
            .subscribe("eth_subscribe", Value::Array(params), "eth_unsubscribe")
            .await?;

        let id = self
            .services
            .hub
            .spawn_subscription(channel, |id, channel, _| async move {
                while let Some(item) = stream.next().await {
                    let (kind, payload) = match item {
                        Ok(result) => (
                            EventType::Message,
                            json!({
                                "type": "eth_subscription",
                                "data": { "subscription": id, "result": result },
                            }),
                        ),
                        Err(e) => {
                            let error = ProviderError::from(e).to_wire(Some(FAMILY));
                            push(&channel, &id, EventType::Error, json!(error));
                            break;
                        }
                    };
                    if !push(&channel, &id, kind, payload) {
                        break;
                    }
                }
            })
            .ok_or(ProviderError::Disconnected)?;
        Ok(json!(id))
    }

    /// Provider events: `connect`, `disconnect`, `accountsChanged`, `chainChanged`.
    pub fn subscribe_events(&self, channel: &Channel, origin: &Origin) -> Result<Value, ProviderError> {
        let services = Arc::clone(&self.services);
        let origin = origin.clone();
        let id = self
            .services
            .hub
            .spawn_subscription(channel, move |id, channel, _| async move {
                run_event_stream(services, origin, id, channel).await;
            })
            .ok_or(ProviderError::Disconnected)?;
        Ok(json!(id))
    }
}

async fn run_event_stream(services: Arc<Services>, origin: Origin, id: String, channel: Channel) {
    let mut records = services.registry.subscribe();
    let mut ticker = tokio::time::interval(services.liveness_poll);
    let mut liveness = LivenessTracker::default();

    let snapshot = |services: &Services| {
        let accounts = {
            let granted = services
                .registry
                .get_auth_record(&origin)
                .is_some_and(|r| r.has_family(FAMILY));
            if granted {
                permitted_accounts(services, &origin, FAMILY)
            } else {
                Vec::new()
            }
        };
        let chain = current_chain(services, &origin, FAMILY).ok();
        (accounts, chain)
    };
    let (mut last_accounts, chain) = snapshot(services.as_ref());
    let mut last_chain_id = chain.as_deref().and_then(ChainInfo::evm_chain_id_hex);

    loop {
        tokio::select! {
            changed = records.changed() => {
                if changed.is_err() {
                    break;
                }
                let (accounts, chain) = snapshot(services.as_ref());
                if accounts != last_accounts {
                    if !push(&channel, &id, EventType::AccountsChanged, json!(accounts)) {
                        break;
                    }
                    last_accounts = accounts;
                }
                let chain_id = chain.as_deref().and_then(ChainInfo::evm_chain_id_hex);
                if chain_id != last_chain_id {
                    if let Some(hex) = &chain_id
                        && !push(&channel, &id, EventType::ChainChanged, json!(hex))
                    {
                        break;
                    }
                    last_chain_id = chain_id;
                }
            }
            _ = ticker.tick() => {
                let Ok(chain) = current_chain(&services, &origin, FAMILY) else {
                    continue;
                };
                let key = ConnectionKey::new(chain.slug.clone(), FAMILY);
                let live = services.connections.status(&key).is_usable();
                let payload = match liveness.observe(live) {
                    Some(EventType::Connect) => (EventType::Connect, json!({ "chainId": chain.evm_chain_id_hex() })),
                    Some(EventType::Disconnect) => (
                        EventType::Disconnect,
                        json!({ "code": EIP1193_DISCONNECTED, "message": format!("{} is unreachable", chain.name) }),
                    ),
                    _ => continue,
                };
                if !push(&channel, &id, payload.0, payload.1) {
                    break;
                }
            }
        }
    }
}

fn chain_id_hex(chain: &ChainInfo) -> Result<String, ProviderError> {
    chain
        .evm_chain_id_hex()
        .ok_or_else(|| ProviderError::UnrecognizedChain(chain.slug.clone()))
}

/// EIP-712 domains that name a chain must name the selected one.
fn check_typed_data_chain(typed_data: &Value, chain: &ChainInfo) -> Result<(), ProviderError> {
    let Some(domain_chain) = typed_data.get("domain").and_then(|d| d.get("chainId")) else {
        return Ok(());
    };
    let id = match domain_chain {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.starts_with("0x") => dappgate_chain::parse_hex_u64(s),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    if id.is_some() && id == chain.evm_chain_id {
        Ok(())
    } else {
        Err(ProviderError::InvalidParams(format!(
            "typed data is for chain {} but {} is selected",
            domain_chain, chain.slug
        )))
    }
}
