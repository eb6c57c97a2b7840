//! Wire protocol between channels and the daemon.
//!
//! Every frame is one JSON object. A channel opens with a [`Hello`], then
//! sends [`InboundMessage`]s; the daemon answers with [`OutboundMessage`]s,
//! which include asynchronous pushes for open subscriptions.

use dappgate_core::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First frame on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Hello {
    /// A web page, identified by its origin.
    Page {
        origin: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// The wallet's own UI.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: RequestId,
    /// Namespaced method, e.g. `evm(request)` or `pri(authorize.list)`.
    pub message: String,
    #[serde(default)]
    pub request: Value,
}

impl InboundMessage {
    pub fn new(id: impl Into<RequestId>, message: impl Into<String>, request: Value) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            request,
        }
    }
}

/// Error object sent to a page.
///
/// EVM pages get EIP-1193 `{code, message, data}`. Cardano pages get
/// CIP-30 errors, which carry a `kind` naming the error family. Substrate
/// pages get a bare message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Connect,
    Disconnect,
    AccountsChanged,
    ChainChanged,
    Message,
    Data,
    Error,
}

/// One pushed value for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: Value,
}

impl PushEvent {
    pub fn new(kind: EventType, payload: Value) -> Self {
        Self { kind, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    Response {
        id: RequestId,
        result: Value,
    },
    Error {
        id: RequestId,
        error: WireError,
    },
    /// Push for an open subscription.
    Event {
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
        event: PushEvent,
    },
    /// The origin is blocked; the page should navigate away.
    Redirect {
        id: RequestId,
        url: String,
    },
}

impl OutboundMessage {
    /// Request this message answers, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            OutboundMessage::Response { id, .. }
            | OutboundMessage::Error { id, .. }
            | OutboundMessage::Redirect { id, .. } => Some(id),
            OutboundMessage::Event { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_hello_page() {
        let hello: Hello =
            serde_json::from_value(json!({"type": "page", "origin": "https://dapp.example"})).unwrap();
        assert_eq!(
            hello,
            Hello::Page {
                origin: "https://dapp.example".into(),
                name: None
            }
        );
        let hello: Hello = serde_json::from_value(json!({"type": "internal"})).unwrap();
        assert_eq!(hello, Hello::Internal);
    }

    #[test]
    fn test_inbound_request_defaults_to_null() {
        let msg: InboundMessage = serde_json::from_value(json!({"id": "1", "message": "pub(ping)"})).unwrap();
        assert_eq!(msg.request, Value::Null);
    }

    #[test]
    fn test_event_shape() {
        let msg = OutboundMessage::Event {
            subscription_id: "s1".into(),
            event: PushEvent::new(EventType::AccountsChanged, json!(["0x01"])),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "event",
                "subscriptionId": "s1",
                "event": {"type": "accountsChanged", "payload": ["0x01"]}
            })
        );
        assert_eq!(msg.request_id(), None);
    }

    #[test]
    fn test_error_skips_empty_fields() {
        let msg = OutboundMessage::Error {
            id: "7".into(),
            error: WireError {
                kind: None,
                code: None,
                message: "Cancelled".into(),
                data: None,
            },
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "error", "id": "7", "error": {"message": "Cancelled"}})
        );
    }
}
