//! Message channels: one per connected page or wallet UI context.

use crate::protocol::OutboundMessage;
use dappgate_core::Origin;
use tokio::sync::mpsc;

pub type ChannelId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Page { origin: Origin, name: Option<String> },
    Internal,
}

/// Sending half of a channel. Cloned into every task that may answer or push.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Channel {
    pub fn new(id: ChannelId, kind: ChannelKind) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, kind, tx }, rx)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn origin(&self) -> Option<&Origin> {
        match &self.kind {
            ChannelKind::Page { origin, .. } => Some(origin),
            ChannelKind::Internal => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ChannelKind::Page { name, .. } => name.as_deref(),
            ChannelKind::Internal => None,
        }
    }

    /// Queue a message for the peer. Returns false once the peer is gone;
    /// results for a closed channel are dropped.
    pub fn send(&self, message: OutboundMessage) -> bool {
        if self.tx.send(message).is_err() {
            tracing::debug!("Channel {} closed, dropping message", self.id);
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_after_close_is_dropped() {
        let (channel, rx) = Channel::new(1, ChannelKind::Internal);
        assert!(channel.send(OutboundMessage::Response {
            id: "1".into(),
            result: json!(true)
        }));
        drop(rx);
        assert!(channel.is_closed());
        assert!(!channel.send(OutboundMessage::Response {
            id: "2".into(),
            result: json!(true)
        }));
    }

    #[test]
    fn test_origin_of_page_channel() {
        let origin = Origin::parse("https://dapp.example/path").unwrap();
        let (channel, _rx) = Channel::new(
            2,
            ChannelKind::Page {
                origin: origin.clone(),
                name: Some("Dapp".into()),
            },
        );
        assert_eq!(channel.origin(), Some(&origin));
        assert_eq!(channel.name(), Some("Dapp"));
    }
}
