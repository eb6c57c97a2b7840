//! Error types for chain operations.

use thiserror::Error;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("Failed to connect to chain: {0}")]
    Connection(String),

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Chain {0} is disconnected")]
    Disconnected(String),

    #[error("Connection was replaced before it became ready")]
    Superseded,

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Light client error: {0}")]
    LightClient(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Metadata probe failed: {0}")]
    Probe(String),

    #[error("Not supported by this backend: {0}")]
    Unsupported(String),
}

impl ChainError {
    /// Classify an error reported by a JSON-RPC client library from its text.
    ///
    /// Client crates surface server errors and socket failures through one
    /// opaque type, so the message is all there is to go on.
    pub fn from_client_message(method: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("method not found") || lower.contains(&METHOD_NOT_FOUND.to_string()) {
            ChainError::MethodNotFound(method.to_string())
        } else if lower.contains("disconnect")
            || lower.contains("restart")
            || lower.contains("connection closed")
            || lower.contains("background task closed")
        {
            ChainError::Disconnected(message)
        } else {
            ChainError::Transport(message)
        }
    }

    /// Whether the error means the backend itself is unreachable.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ChainError::Disconnected(_) | ChainError::Connection(_) | ChainError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ChainError::Disconnected(e.to_string())
        } else if e.is_decode() {
            ChainError::InvalidData(e.to_string())
        } else {
            ChainError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_method_not_found() {
        let e = ChainError::from_client_message("foo_bar", "ErrorObject { code: -32601, message: \"Method not found\" }");
        assert!(matches!(e, ChainError::MethodNotFound(m) if m == "foo_bar"));
    }

    #[test]
    fn test_classify_disconnect() {
        let e = ChainError::from_client_message("eth_call", "The background task closed; restart required");
        assert!(e.is_disconnect());
        assert!(matches!(e, ChainError::Disconnected(_)));
    }

    #[test]
    fn test_classify_other() {
        let e = ChainError::from_client_message("eth_call", "execution reverted");
        assert!(matches!(e, ChainError::Transport(_)));
    }
}
