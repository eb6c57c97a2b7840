//! Closed request vocabularies.
//!
//! Every namespaced message is parsed into a variant here before anything
//! else happens. A name outside these sets is `Unsupported`; a known name
//! with a bad payload is `InvalidParams`.

use crate::error::ProviderError;
use dappgate_core::{
    Address, AuthorizeResult, ChainFamily, ChainSlug, ConfirmationResult, Origin,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// Read-only EVM methods forwarded verbatim to the node.
pub const EVM_PASSTHROUGH: &[&str] = &[
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getCode",
    "eth_getLogs",
    "eth_getStorageAt",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_maxPriorityFeePerGas",
    "eth_sendRawTransaction",
    "web3_clientVersion",
];

/// Substrate RPC methods a page may call through `substrate(rpc.send)`.
pub const SUBSTRATE_PASSTHROUGH: &[&str] = &[
    "author_submitExtrinsic",
    "chain_getBlock",
    "chain_getBlockHash",
    "chain_getFinalizedHead",
    "chain_getHeader",
    "payment_queryInfo",
    "state_call",
    "state_getMetadata",
    "state_getRuntimeVersion",
    "state_getStorage",
    "system_accountNextIndex",
    "system_chain",
    "system_health",
    "system_properties",
];

fn params<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(ProviderError::invalid_params)
}

/// Positional params as a list; `null` means none.
fn positional(value: Value) -> Result<Vec<Value>, ProviderError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(ProviderError::InvalidParams(format!(
            "expected a params array, got {}",
            other
        ))),
    }
}

fn string_at(items: &[Value], index: usize, what: &str) -> Result<String, ProviderError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidParams(format!("missing {}", what)))
}

fn parse_quantity(raw: &str) -> Result<u64, ProviderError> {
    dappgate_chain::parse_hex_u64(raw)
        .ok_or_else(|| ProviderError::InvalidParams(format!("{} is not a hex quantity", raw)))
}

/// Family whose error shape applies to a namespaced message.
pub fn family_of(message: &str) -> Option<ChainFamily> {
    if message.starts_with("evm(") {
        Some(ChainFamily::Evm)
    } else if message.starts_with("cardano(") {
        Some(ChainFamily::Cardano)
    } else if message.starts_with("substrate(") {
        Some(ChainFamily::Substrate)
    } else {
        None
    }
}

// ==================== Generic page methods ====================

fn default_families() -> Vec<ChainFamily> {
    vec![ChainFamily::Evm]
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeTabParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_families")]
    pub families: Vec<ChainFamily>,
    #[serde(default)]
    pub reconfirm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsParams {
    #[serde(default = "default_families")]
    pub families: Vec<ChainFamily>,
    #[serde(default)]
    pub any_type: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeParams {
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageRequest {
    Ping,
    AuthorizeTab(AuthorizeTabParams),
    AccountsList(AccountsParams),
    AccountsSubscribe(AccountsParams),
    AccountsUnsubscribe(UnsubscribeParams),
    Evm(EvmRequest),
    EvmEventsSubscribe,
    Substrate(SubstrateRequest),
    Cardano(CardanoRequest),
}

impl PageRequest {
    pub fn parse(message: &str, payload: Value) -> Result<Self, ProviderError> {
        match message {
            "pub(ping)" => Ok(PageRequest::Ping),
            "pub(authorize.tab)" => Ok(PageRequest::AuthorizeTab(params(or_empty(payload))?)),
            "pub(accounts.list)" => Ok(PageRequest::AccountsList(params(or_empty(payload))?)),
            "pub(accounts.subscribe)" => Ok(PageRequest::AccountsSubscribe(params(or_empty(payload))?)),
            "pub(accounts.unsubscribe)" => Ok(PageRequest::AccountsUnsubscribe(params(payload)?)),
            "evm(request)" => Ok(PageRequest::Evm(EvmRequest::parse(params(payload)?)?)),
            "evm(events.subscribe)" => Ok(PageRequest::EvmEventsSubscribe),
            "substrate(bytes.sign)" => Ok(PageRequest::Substrate(SubstrateRequest::SignBytes(params(payload)?))),
            "substrate(extrinsic.sign)" => {
                Ok(PageRequest::Substrate(SubstrateRequest::SignExtrinsic(params(payload)?)))
            }
            "substrate(rpc.send)" => Ok(PageRequest::Substrate(SubstrateRequest::parse_rpc(params(payload)?)?)),
            "cardano(request)" => Ok(PageRequest::Cardano(CardanoRequest::parse(params(payload)?)?)),
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }

    /// Family that must be granted before this request runs. `None` for
    /// requests that are public or perform the handshake themselves.
    pub fn required_family(&self) -> Option<ChainFamily> {
        match self {
            PageRequest::Ping
            | PageRequest::AuthorizeTab(_)
            | PageRequest::AccountsList(_)
            | PageRequest::AccountsSubscribe(_)
            | PageRequest::AccountsUnsubscribe(_) => None,
            PageRequest::Evm(req) if req.is_public() => None,
            PageRequest::Evm(_) | PageRequest::EvmEventsSubscribe => Some(ChainFamily::Evm),
            PageRequest::Substrate(_) => Some(ChainFamily::Substrate),
            PageRequest::Cardano(req) if req.is_public() => None,
            PageRequest::Cardano(_) => Some(ChainFamily::Cardano),
        }
    }
}

fn or_empty(payload: Value) -> Value {
    if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    }
}

// ==================== EVM ====================

/// EIP-1193 `request({method, params})`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvmCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    #[serde(default)]
    pub name: Option<String>,
    pub symbol: String,
    pub decimals: u8,
}

/// EIP-3085 `wallet_addEthereumChain` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    #[serde(default)]
    pub block_explorer_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchAssetOptions {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub image: Option<String>,
}

/// EIP-747 `wallet_watchAsset` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchAssetParams {
    #[serde(rename = "type")]
    pub asset_type: String,
    pub options: WatchAssetOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvmRequest {
    RequestAccounts,
    Accounts,
    ChainId,
    NetVersion,
    RequestPermissions,
    GetPermissions,
    SwitchChain { chain_id: u64 },
    AddChain { chain_id: u64, params: AddChainParams },
    WatchAsset(WatchAssetParams),
    PersonalSign { address: Address, message: String },
    EthSign { address: Address, message: String },
    SignTypedDataV4 { address: Address, typed_data: Value },
    SendTransaction { from: Address, tx: Value },
    Subscribe { params: Vec<Value> },
    Unsubscribe { subscription_id: String },
    Passthrough { method: String, params: Value },
}

impl EvmRequest {
    pub fn parse(call: EvmCall) -> Result<Self, ProviderError> {
        let method = call.method.as_str();
        match method {
            "eth_requestAccounts" => Ok(EvmRequest::RequestAccounts),
            "eth_accounts" => Ok(EvmRequest::Accounts),
            "eth_chainId" => Ok(EvmRequest::ChainId),
            "net_version" => Ok(EvmRequest::NetVersion),
            "wallet_requestPermissions" => Ok(EvmRequest::RequestPermissions),
            "wallet_getPermissions" => Ok(EvmRequest::GetPermissions),
            "wallet_switchEthereumChain" => {
                let items = positional(call.params)?;
                let chain_id = items
                    .first()
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::InvalidParams("missing chainId".to_string()))?;
                Ok(EvmRequest::SwitchChain {
                    chain_id: parse_quantity(chain_id)?,
                })
            }
            "wallet_addEthereumChain" => {
                let mut items = positional(call.params)?;
                if items.is_empty() {
                    return Err(ProviderError::InvalidParams("missing chain parameter".to_string()));
                }
                let params: AddChainParams = self::params(items.swap_remove(0))?;
                if params.rpc_urls.is_empty() {
                    return Err(ProviderError::InvalidParams("rpcUrls must not be empty".to_string()));
                }
                Ok(EvmRequest::AddChain {
                    chain_id: parse_quantity(&params.chain_id)?,
                    params,
                })
            }
            "wallet_watchAsset" => {
                // Some libraries send the object directly, others wrap it in an array.
                let value = match call.params {
                    Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
                    other => other,
                };
                let asset: WatchAssetParams = params(value)?;
                if asset.asset_type != "ERC20" {
                    return Err(ProviderError::InvalidParams(format!(
                        "asset type {} is not supported",
                        asset.asset_type
                    )));
                }
                Ok(EvmRequest::WatchAsset(asset))
            }
            "personal_sign" => {
                let items = positional(call.params)?;
                Ok(EvmRequest::PersonalSign {
                    message: string_at(&items, 0, "message")?,
                    address: Address::new(string_at(&items, 1, "address")?),
                })
            }
            "eth_sign" => {
                let items = positional(call.params)?;
                Ok(EvmRequest::EthSign {
                    address: Address::new(string_at(&items, 0, "address")?),
                    message: string_at(&items, 1, "message")?,
                })
            }
            "eth_signTypedData_v4" => {
                let items = positional(call.params)?;
                let address = Address::new(string_at(&items, 0, "address")?);
                let typed_data = match items.get(1) {
                    Some(Value::String(raw)) => {
                        serde_json::from_str(raw).map_err(ProviderError::invalid_params)?
                    }
                    Some(obj @ Value::Object(_)) => obj.clone(),
                    _ => return Err(ProviderError::InvalidParams("missing typed data".to_string())),
                };
                Ok(EvmRequest::SignTypedDataV4 { address, typed_data })
            }
            "eth_sendTransaction" => {
                let mut items = positional(call.params)?;
                if items.is_empty() {
                    return Err(ProviderError::InvalidParams("missing transaction".to_string()));
                }
                let tx = items.swap_remove(0);
                let from = tx
                    .get("from")
                    .and_then(Value::as_str)
                    .map(Address::new)
                    .ok_or_else(|| ProviderError::InvalidParams("transaction has no from".to_string()))?;
                Ok(EvmRequest::SendTransaction { from, tx })
            }
            "eth_subscribe" => {
                let items = positional(call.params)?;
                if items.first().and_then(Value::as_str).is_none() {
                    return Err(ProviderError::InvalidParams("missing subscription type".to_string()));
                }
                Ok(EvmRequest::Subscribe { params: items })
            }
            "eth_unsubscribe" => {
                let items = positional(call.params)?;
                Ok(EvmRequest::Unsubscribe {
                    subscription_id: string_at(&items, 0, "subscription id")?,
                })
            }
            m if EVM_PASSTHROUGH.contains(&m) => Ok(EvmRequest::Passthrough {
                method: call.method,
                params: call.params,
            }),
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }

    /// Methods a page may call before connecting.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            EvmRequest::RequestAccounts
                | EvmRequest::Accounts
                | EvmRequest::ChainId
                | EvmRequest::NetVersion
                | EvmRequest::RequestPermissions
                | EvmRequest::GetPermissions
                | EvmRequest::Passthrough { .. }
        )
    }
}

// ==================== Substrate ====================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignBytesParams {
    pub address: Address,
    /// Hex encoded bytes.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignExtrinsicParams {
    pub address: Address,
    pub genesis_hash: String,
    /// Signer payload as produced by the page's API library.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcSendParams {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubstrateRequest {
    SignBytes(SignBytesParams),
    SignExtrinsic(SignExtrinsicParams),
    RpcSend { method: String, params: Value },
}

impl SubstrateRequest {
    fn parse_rpc(p: RpcSendParams) -> Result<Self, ProviderError> {
        if !SUBSTRATE_PASSTHROUGH.contains(&p.method.as_str()) {
            return Err(ProviderError::Unsupported(p.method));
        }
        Ok(SubstrateRequest::RpcSend {
            method: p.method,
            params: p.params,
        })
    }
}

// ==================== Cardano ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardanoRequest {
    Enable,
    GetNetworkId,
    GetUtxos { amount: Option<u64> },
    GetCollateral { amount: u64 },
    GetBalance,
    GetUsedAddresses,
    GetUnusedAddresses,
    GetChangeAddress,
    GetRewardAddresses,
    SignTx { tx: String, partial_sign: bool },
    SignData { address: Address, payload: String },
    SubmitTx { tx: String },
}

/// Default collateral target: 5 ADA in lovelace.
pub const DEFAULT_COLLATERAL: u64 = 5_000_000;

fn lovelace(value: Option<&Value>) -> Result<Option<u64>, ProviderError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ProviderError::InvalidParams("amount must be a positive integer".to_string())),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(ProviderError::invalid_params),
        Some(other) => Err(ProviderError::InvalidParams(format!("invalid amount {}", other))),
    }
}

impl CardanoRequest {
    pub fn parse(call: EvmCall) -> Result<Self, ProviderError> {
        let items = positional(call.params)?;
        match call.method.as_str() {
            "enable" => Ok(CardanoRequest::Enable),
            "getNetworkId" => Ok(CardanoRequest::GetNetworkId),
            "getUtxos" => Ok(CardanoRequest::GetUtxos {
                amount: lovelace(items.first())?,
            }),
            "getCollateral" => {
                let amount = items
                    .first()
                    .map(|p| p.get("amount").unwrap_or(p));
                Ok(CardanoRequest::GetCollateral {
                    amount: lovelace(amount)?.unwrap_or(DEFAULT_COLLATERAL),
                })
            }
            "getBalance" => Ok(CardanoRequest::GetBalance),
            "getUsedAddresses" => Ok(CardanoRequest::GetUsedAddresses),
            "getUnusedAddresses" => Ok(CardanoRequest::GetUnusedAddresses),
            "getChangeAddress" => Ok(CardanoRequest::GetChangeAddress),
            "getRewardAddresses" => Ok(CardanoRequest::GetRewardAddresses),
            "signTx" => Ok(CardanoRequest::SignTx {
                tx: string_at(&items, 0, "transaction")?,
                partial_sign: items.get(1).and_then(Value::as_bool).unwrap_or(false),
            }),
            "signData" => Ok(CardanoRequest::SignData {
                address: Address::new(string_at(&items, 0, "address")?),
                payload: string_at(&items, 1, "payload")?,
            }),
            "submitTx" => Ok(CardanoRequest::SubmitTx {
                tx: string_at(&items, 0, "transaction")?,
            }),
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }

    /// `enable` runs the handshake itself.
    pub fn is_public(&self) -> bool {
        matches!(self, CardanoRequest::Enable)
    }
}

// ==================== Internal ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideAction {
    Allow,
    Deny,
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalRequest {
    AuthorizeList,
    AuthorizeSetAddresses {
        origin: Origin,
        family: ChainFamily,
        addresses: BTreeMap<Address, bool>,
    },
    AuthorizeRevokeFamily {
        origin: Origin,
        family: ChainFamily,
    },
    AuthorizeForget {
        origin: Origin,
    },
    AuthorizeResolve(AuthorizeResult),
    ConfirmationsSubscribe,
    ConfirmationsResolve(ConfirmationResult<Value>),
    ConnectionStatus,
    ConnectionUpdateEndpoint {
        chain: ChainSlug,
        url: String,
    },
    PhishingOverride {
        host: String,
        action: OverrideAction,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAddressesParams {
    origin: Origin,
    family: ChainFamily,
    addresses: BTreeMap<Address, bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OriginFamilyParams {
    origin: Origin,
    family: ChainFamily,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OriginParams {
    origin: Origin,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEndpointParams {
    chain: ChainSlug,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideParams {
    host: String,
    action: OverrideAction,
}

impl InternalRequest {
    pub fn parse(message: &str, payload: Value) -> Result<Self, ProviderError> {
        match message {
            "pri(authorize.list)" => Ok(InternalRequest::AuthorizeList),
            "pri(authorize.setAddresses)" => {
                let p: SetAddressesParams = params(payload)?;
                Ok(InternalRequest::AuthorizeSetAddresses {
                    origin: p.origin,
                    family: p.family,
                    addresses: p.addresses,
                })
            }
            "pri(authorize.revokeFamily)" => {
                let p: OriginFamilyParams = params(payload)?;
                Ok(InternalRequest::AuthorizeRevokeFamily {
                    origin: p.origin,
                    family: p.family,
                })
            }
            "pri(authorize.forget)" => {
                let p: OriginParams = params(payload)?;
                Ok(InternalRequest::AuthorizeForget { origin: p.origin })
            }
            "pri(authorize.resolve)" => Ok(InternalRequest::AuthorizeResolve(params(payload)?)),
            "pri(confirmations.subscribe)" => Ok(InternalRequest::ConfirmationsSubscribe),
            "pri(confirmations.resolve)" => Ok(InternalRequest::ConfirmationsResolve(params(payload)?)),
            "pri(connection.status)" => Ok(InternalRequest::ConnectionStatus),
            "pri(connection.updateEndpoint)" => {
                let p: UpdateEndpointParams = params(payload)?;
                Ok(InternalRequest::ConnectionUpdateEndpoint {
                    chain: p.chain,
                    url: p.url,
                })
            }
            "pri(phishing.override)" => {
                let p: OverrideParams = params(payload)?;
                Ok(InternalRequest::PhishingOverride {
                    host: p.host,
                    action: p.action,
                })
            }
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }
}
