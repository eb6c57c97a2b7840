//! Page-facing errors and their per-family wire shapes.

use crate::protocol::WireError;
use dappgate_chain::ChainError;
use dappgate_core::{AuthError, ChainFamily, KeyringError, QueueError};
use serde_json::Value;
use thiserror::Error;

// ==================== EIP-1193 ====================

pub const EIP1193_USER_REJECTED: i64 = 4001;
pub const EIP1193_UNAUTHORIZED: i64 = 4100;
pub const EIP1193_UNSUPPORTED_METHOD: i64 = 4200;
pub const EIP1193_DISCONNECTED: i64 = 4900;
pub const EIP1193_CHAIN_DISCONNECTED: i64 = 4901;
pub const EIP1193_UNRECOGNIZED_CHAIN: i64 = 4902;
pub const JSONRPC_INVALID_PARAMS: i64 = -32602;
pub const JSONRPC_INTERNAL: i64 = -32603;

// ==================== CIP-30 ====================

pub const CIP30_INVALID_REQUEST: i64 = -1;
pub const CIP30_INTERNAL: i64 = -2;
pub const CIP30_REFUSED: i64 = -3;
pub const CIP30_ACCOUNT_CHANGE: i64 = -4;
pub const CIP30_TX_SIGN_USER_DECLINED: i64 = 2;
pub const CIP30_DATA_SIGN_USER_DECLINED: i64 = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("User rejected the request")]
    UserRejected,

    #[error("User declined to sign the transaction")]
    TxSignDeclined,

    #[error("User declined to sign the data")]
    DataSignDeclined,

    #[error("The requested account and/or method has not been authorized by the user")]
    Unauthorized,

    #[error("The active account changed")]
    AccountChanged,

    #[error("Unsupported method: {0}")]
    Unsupported(String),

    #[error("The provider is disconnected from all chains")]
    Disconnected,

    #[error("Network disconnected: {0}")]
    ChainDisconnected(String),

    #[error("Unrecognized chain: {0}")]
    UnrecognizedChain(String),

    #[error("Network not supported: {0}")]
    NetworkNotSupported(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// An error that already carries a code from the node.
    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn invalid_params(e: impl std::fmt::Display) -> Self {
        ProviderError::InvalidParams(e.to_string())
    }

    /// Shape for the page family that made the request.
    ///
    /// `None` stands for the generic namespace, which uses message-only errors.
    pub fn to_wire(&self, family: Option<ChainFamily>) -> WireError {
        match family {
            Some(ChainFamily::Evm) => self.to_eip1193(),
            Some(ChainFamily::Cardano) => self.to_cip30(),
            Some(ChainFamily::Substrate) | None => WireError {
                kind: None,
                code: None,
                message: self.substrate_message(),
                data: None,
            },
        }
    }

    fn to_eip1193(&self) -> WireError {
        let code = match self {
            ProviderError::UserRejected
            | ProviderError::TxSignDeclined
            | ProviderError::DataSignDeclined => EIP1193_USER_REJECTED,
            ProviderError::Unauthorized | ProviderError::AccountChanged => EIP1193_UNAUTHORIZED,
            ProviderError::Unsupported(_) => EIP1193_UNSUPPORTED_METHOD,
            ProviderError::Disconnected => EIP1193_DISCONNECTED,
            ProviderError::ChainDisconnected(_) => EIP1193_CHAIN_DISCONNECTED,
            ProviderError::UnrecognizedChain(_) | ProviderError::NetworkNotSupported(_) => {
                EIP1193_UNRECOGNIZED_CHAIN
            }
            ProviderError::InvalidParams(_) => JSONRPC_INVALID_PARAMS,
            ProviderError::Rpc { code, .. } => *code,
            ProviderError::Internal(_) => JSONRPC_INTERNAL,
        };
        let data = match self {
            ProviderError::Rpc { data, .. } => data.clone(),
            _ => None,
        };
        WireError {
            kind: None,
            code: Some(code),
            message: self.to_string(),
            data,
        }
    }

    fn to_cip30(&self) -> WireError {
        let (kind, code) = match self {
            ProviderError::TxSignDeclined => ("TxSignError", CIP30_TX_SIGN_USER_DECLINED),
            ProviderError::DataSignDeclined => ("DataSignError", CIP30_DATA_SIGN_USER_DECLINED),
            ProviderError::UserRejected | ProviderError::Unauthorized => ("APIError", CIP30_REFUSED),
            ProviderError::AccountChanged => ("APIError", CIP30_ACCOUNT_CHANGE),
            ProviderError::Unsupported(_)
            | ProviderError::InvalidParams(_)
            | ProviderError::UnrecognizedChain(_)
            | ProviderError::NetworkNotSupported(_) => ("APIError", CIP30_INVALID_REQUEST),
            ProviderError::Disconnected
            | ProviderError::ChainDisconnected(_)
            | ProviderError::Rpc { .. }
            | ProviderError::Internal(_) => ("APIError", CIP30_INTERNAL),
        };
        WireError {
            kind: Some(kind.to_string()),
            code: Some(code),
            message: self.to_string(),
            data: None,
        }
    }

    fn substrate_message(&self) -> String {
        match self {
            ProviderError::UserRejected
            | ProviderError::TxSignDeclined
            | ProviderError::DataSignDeclined => "Cancelled".to_string(),
            ProviderError::Unauthorized => "Unable to find authorization for this origin".to_string(),
            other => other.to_string(),
        }
    }
}

/// Backend failures are curated: a server-supplied code passes through,
/// transport failures all read as "network disconnected", and the rest
/// becomes an internal error carrying the original text.
impl From<ChainError> for ProviderError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Rpc { code, message, data } => ProviderError::Rpc { code, message, data },
            ChainError::MethodNotFound(method) => ProviderError::Unsupported(method),
            ChainError::Unsupported(what) => ProviderError::Unsupported(what),
            ChainError::Disconnected(what)
            | ChainError::Connection(what)
            | ChainError::Transport(what)
            | ChainError::LightClient(what) => ProviderError::ChainDisconnected(what),
            ChainError::Superseded => ProviderError::ChainDisconnected("connection replaced".to_string()),
            ChainError::UnknownChain(chain) => ProviderError::UnrecognizedChain(chain),
            ChainError::Probe(reason) => ProviderError::NetworkNotSupported(reason),
            ChainError::InvalidEndpoint(url, reason) => {
                ProviderError::InvalidParams(format!("{}: {}", url, reason))
            }
            ChainError::InvalidData(reason) => ProviderError::Internal(reason),
        }
    }
}

impl From<AuthError> for ProviderError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotFound(_) => ProviderError::Unauthorized,
            AuthError::AlreadyPending(origin) => ProviderError::Rpc {
                code: -32002,
                message: format!("An authorization request from {} is already pending", origin),
                data: None,
            },
            AuthError::NoCompatibleAccounts(_) => ProviderError::Unauthorized,
            AuthError::NoFamilies => {
                ProviderError::InvalidParams("at least one chain family must be requested".to_string())
            }
            AuthError::Queue(q) => q.into(),
        }
    }
}

impl From<QueueError> for ProviderError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::InvalidResponse(..) => ProviderError::InvalidParams(e.to_string()),
            other => ProviderError::Internal(other.to_string()),
        }
    }
}

impl From<KeyringError> for ProviderError {
    fn from(e: KeyringError) -> Self {
        match e {
            KeyringError::UnknownAccount(_) => ProviderError::Unauthorized,
            KeyringError::InvalidPassword => ProviderError::InvalidParams("invalid password".to_string()),
            other => ProviderError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_eip1193_codes() {
        let cases = [
            (ProviderError::UserRejected, 4001),
            (ProviderError::Unauthorized, 4100),
            (ProviderError::Unsupported("eth_foo".into()), 4200),
            (ProviderError::Disconnected, 4900),
            (ProviderError::ChainDisconnected("ethereum".into()), 4901),
            (ProviderError::NetworkNotSupported("0x5".into()), 4902),
            (ProviderError::InvalidParams("x".into()), -32602),
            (ProviderError::Internal("x".into()), -32603),
        ];
        for (error, code) in cases {
            assert_eq!(error.to_wire(Some(ChainFamily::Evm)).code, Some(code), "{}", error);
        }
    }

    #[test]
    fn test_rpc_code_passes_through() {
        let error = ProviderError::from(ChainError::Rpc {
            code: 3,
            message: "execution reverted".into(),
            data: Some(Value::String("0x08c3".into())),
        });
        let wire = error.to_wire(Some(ChainFamily::Evm));
        assert_eq!(wire.code, Some(3));
        assert_eq!(wire.message, "execution reverted");
        assert_eq!(wire.data, Some(Value::String("0x08c3".into())));
    }

    #[test]
    fn test_chain_errors_are_curated() {
        assert_eq!(
            ProviderError::from(ChainError::MethodNotFound("foo".into())),
            ProviderError::Unsupported("foo".into())
        );
        assert!(matches!(
            ProviderError::from(ChainError::Transport("socket reset by peer".into())),
            ProviderError::ChainDisconnected(_)
        ));
        assert!(matches!(
            ProviderError::from(ChainError::Probe("timeout".into())),
            ProviderError::NetworkNotSupported(_)
        ));
    }

    #[test]
    fn test_cip30_shapes() {
        let wire = ProviderError::UserRejected.to_wire(Some(ChainFamily::Cardano));
        assert_eq!(wire.kind.as_deref(), Some("APIError"));
        assert_eq!(wire.code, Some(-3));

        let wire = ProviderError::TxSignDeclined.to_wire(Some(ChainFamily::Cardano));
        assert_eq!(wire.kind.as_deref(), Some("TxSignError"));
        assert_eq!(wire.code, Some(2));

        let wire = ProviderError::DataSignDeclined.to_wire(Some(ChainFamily::Cardano));
        assert_eq!(wire.kind.as_deref(), Some("DataSignError"));
        assert_eq!(wire.code, Some(3));

        let wire = ProviderError::Unsupported("x".into()).to_wire(Some(ChainFamily::Cardano));
        assert_eq!(wire.code, Some(-1));
    }

    #[test]
    fn test_substrate_is_message_only() {
        let wire = ProviderError::UserRejected.to_wire(Some(ChainFamily::Substrate));
        assert_eq!(wire.code, None);
        assert_eq!(wire.kind, None);
        assert_eq!(wire.message, "Cancelled");
    }

    #[test]
    fn test_declined_handshake_is_distinct_from_internal() {
        let declined = ProviderError::UserRejected.to_wire(Some(ChainFamily::Evm));
        let internal = ProviderError::Internal("boom".into()).to_wire(Some(ChainFamily::Evm));
        assert_ne!(declined.code, internal.code);
    }
}
