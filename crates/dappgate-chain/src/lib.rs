//! Chain connectivity for the dApp mediation layer.
//!
//! This crate provides:
//! - Endpoint classification and provider quirks (`strategy` module)
//! - Backends for JSON-RPC over HTTP and websockets, Blockfrost and the smoldot light client
//! - The connection manager with per-connection readiness generations
//! - The chain store and the built-in chain table
//! - Metadata probing for unknown EVM chains

pub mod backend;
pub mod chains;
pub mod config;
pub mod connector;
pub mod error;
pub mod manager;
pub mod probe;
pub mod strategy;

pub use backend::{ChainBackend, NotificationStream, health_method};
pub use chains::{ChainInfo, ChainSnapshot, ChainStore, TokenInfo};
pub use connector::{BackendConnector, DefaultConnector, Endpoint};
pub use error::ChainError;
pub use manager::{ConnectionInfo, ConnectionKey, ConnectionManager, GenerationReady, Readiness};
pub use probe::{ChainMetadataSource, MetadataProbe, parse_hex_u64};
pub use strategy::{EndpointStrategy, Provider, Transport, select_strategy};
