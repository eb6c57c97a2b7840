//! dApp mediation daemon.
//!
//! This crate provides:
//! - The channel wire protocol (`protocol` module)
//! - Closed request vocabularies per chain family (`request` module)
//! - Family-shaped provider errors (`error` module)
//! - The phishing guard (`phishing` module)
//! - Chain-family adapters (`adapters` module)
//! - Subscription fan-out (`fanout` module)
//! - The request dispatcher (`dispatcher` module)
//! - The line-delimited JSON channel server (`server` module)

pub mod adapters;
pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod phishing;
pub mod protocol;
pub mod request;
pub mod server;
pub mod services;

pub use channel::{Channel, ChannelId, ChannelKind};
pub use context::{Services, ServicesBuilder};
pub use dispatcher::Dispatcher;
pub use error::ProviderError;
pub use fanout::{SubscriptionHub, TeardownGuard};
pub use phishing::{DenyListSource, HttpDenyList, PhishingGuard, Verdict};
pub use protocol::{EventType, Hello, InboundMessage, OutboundMessage, PushEvent, WireError};
pub use server::{ServerError, handle_connection, serve};
pub use services::{RpcTransactionService, TransactionService};
