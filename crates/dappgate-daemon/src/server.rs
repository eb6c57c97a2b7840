//! Line-delimited JSON channel server.
//!
//! One TCP connection is one channel. The first line is a [`Hello`]; every
//! later line is an [`InboundMessage`]. Answers and pushes go back as lines
//! on the same socket. Closing the socket closes the channel.

use crate::channel::ChannelKind;
use crate::dispatcher::Dispatcher;
use crate::error::ProviderError;
use crate::protocol::{Hello, InboundMessage, OutboundMessage};
use dappgate_core::Origin;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Longest accepted line.
pub const MAX_LINE: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Accept channels until `shutdown` fires, then wait for open channels to close.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let tracker = TaskTracker::new();
    tracing::info!("Listening on {}", listener.local_addr()?);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                tracing::debug!("Connection from {}", peer);
                let dispatcher = dispatcher.clone();
                let token = shutdown.child_token();
                tracker.spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher, token).await {
                        tracing::warn!("Channel from {} ended: {}", peer, e);
                    }
                });
            }
        }
    }
    tracker.close();
    tracker.wait().await;
    Ok(())
}

fn channel_kind(line: &str) -> Result<ChannelKind, ServerError> {
    let hello: Hello =
        serde_json::from_str(line).map_err(|e| ServerError::Handshake(e.to_string()))?;
    match hello {
        Hello::Page { origin, name } => {
            let origin = Origin::parse(&origin).map_err(|e| ServerError::Handshake(e.to_string()))?;
            Ok(ChannelKind::Page { origin, name })
        }
        Hello::Internal => Ok(ChannelKind::Internal),
    }
}

/// Best-effort error for a line that is not a valid request.
fn malformed(line: &str, reason: String) -> OutboundMessage {
    let id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_default();
    OutboundMessage::Error {
        id,
        error: ProviderError::InvalidParams(reason).to_wire(None),
    }
}

/// Serve one channel over any byte stream.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE));
    let (mut sink, mut lines) = framed.split();

    let first = match lines.next().await {
        Some(line) => line?,
        None => return Ok(()),
    };
    let kind = match channel_kind(&first) {
        Ok(kind) => kind,
        Err(e) => {
            let error = ProviderError::InvalidParams(e.to_string()).to_wire(None);
            let reply = OutboundMessage::Error { id: String::new(), error };
            if let Ok(line) = serde_json::to_string(&reply) {
                let _ = sink.send(line).await;
            }
            return Err(e);
        }
    };

    let (channel, mut outbound) = dispatcher.open_channel(kind);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    let result = loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            next = lines.next() => next,
        };
        let line = match next {
            None => break Ok(()),
            Some(Err(e)) => break Err(ServerError::from(e)),
            Some(Ok(line)) => line,
        };
        if line.trim().is_empty() {
            continue;
        }
        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                channel.send(malformed(&line, e.to_string()));
                continue;
            }
        };
        let dispatcher = dispatcher.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            dispatcher.dispatch(&channel, message).await;
        });
    };

    // Drop the receiver before tearing down so late registrations see a closed channel.
    writer.abort();
    let _ = writer.await;
    dispatcher.close_channel(&channel);
    result
}
