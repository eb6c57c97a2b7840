//! Core domain types shared by the registry, queue, adapters and connection layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a known chain (e.g. "ethereum", "polkadot").
pub type ChainSlug = String;

/// Identifier of an inbound request or a pending confirmation.
pub type RequestId = String;

/// Chain families - exhaustive match required (no default case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Account-based smart-contract chains speaking the Ethereum JSON-RPC.
    Evm,
    /// Polkadot-SDK chains.
    Substrate,
    /// UTXO chains exposed through a CIP-30 style surface.
    Cardano,
}

impl ChainFamily {
    /// Returns all known families.
    pub fn all() -> &'static [ChainFamily] {
        &[ChainFamily::Evm, ChainFamily::Substrate, ChainFamily::Cardano]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "EVM",
            ChainFamily::Substrate => "Substrate",
            ChainFamily::Cardano => "Cardano",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "evm" | "ethereum" => Ok(ChainFamily::Evm),
            "substrate" | "polkadot" => Ok(ChainFamily::Substrate),
            "cardano" => Ok(ChainFamily::Cardano),
            _ => Err(format!(
                "Unknown chain family '{}'. Valid options: evm, substrate, cardano",
                s
            )),
        }
    }
}

/// Account address as held by the keyring.
///
/// Hex (`0x`) addresses are case-insensitive and stored lowercased so that
/// permission maps never hold two spellings of the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            Address(trimmed.to_ascii_lowercase())
        } else {
            Address(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the address is a 20-byte hex account.
    pub fn is_ethereum(&self) -> bool {
        self.0.len() == 42
            && self.0.starts_with("0x")
            && self.0[2..].chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Address::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key scheme of a keyring account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ethereum,
    Sr25519,
    Ed25519,
    Ecdsa,
    Cardano,
}

impl KeyType {
    /// Chain families an address of this type can act on.
    pub fn families(&self) -> &'static [ChainFamily] {
        match self {
            KeyType::Ethereum => &[ChainFamily::Evm, ChainFamily::Substrate],
            KeyType::Sr25519 | KeyType::Ed25519 | KeyType::Ecdsa => &[ChainFamily::Substrate],
            KeyType::Cardano => &[ChainFamily::Cardano],
        }
    }

    pub fn supports(&self, family: ChainFamily) -> bool {
        self.families().contains(&family)
    }

    /// Ethereum keys also sign on EVM-compatible Polkadot-SDK chains.
    pub fn is_dual_purpose(&self) -> bool {
        self.families().len() > 1
    }
}

/// Account entry exposed by the keyring. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringAccount {
    pub address: Address,
    #[serde(default)]
    pub name: Option<String>,
    pub key_type: KeyType,
    /// Creation timestamp (Unix milliseconds).
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub hidden: bool,
    /// Hardware, QR or otherwise external signer; signatures come back from the UI.
    #[serde(default)]
    pub external: bool,
}

impl KeyringAccount {
    pub fn supports_any(&self, families: &[ChainFamily]) -> bool {
        families.iter().any(|family| self.key_type.supports(*family))
    }
}

/// Signing flavour requested by a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignMethod {
    PersonalSign,
    EthSign,
    TypedDataV4,
    EvmTransaction,
    SubstrateBytes,
    SubstrateExtrinsic,
    CardanoData,
    CardanoTx,
}

impl SignMethod {
    pub fn family(&self) -> ChainFamily {
        match self {
            SignMethod::PersonalSign
            | SignMethod::EthSign
            | SignMethod::TypedDataV4
            | SignMethod::EvmTransaction => ChainFamily::Evm,
            SignMethod::SubstrateBytes | SignMethod::SubstrateExtrinsic => ChainFamily::Substrate,
            SignMethod::CardanoData | SignMethod::CardanoTx => ChainFamily::Cardano,
        }
    }
}

/// Payload handed to the signer once the user approved it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub address: Address,
    pub method: SignMethod,
    #[serde(default)]
    pub chain: Option<ChainSlug>,
    pub data: serde_json::Value,
}

/// Connection status for a chain backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Unstable,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Unstable => "Unstable",
        }
    }

    /// Requests may still be attempted while the link is flaky.
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Unstable)
    }
}

/// Current time in Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
