//! Core domain logic for the dApp mediation layer.
//!
//! This crate provides:
//! - Origin normalization (`origin` module)
//! - Core domain types (`types` module)
//! - The keyring contract (`keyring` module)
//! - The per-origin authorization registry (`auth` module)
//! - The confirmation queue (`confirmation` module)
//! - Connection, phishing and probe settings (`settings` module)
//!
//! With the `persistence` feature enabled:
//! - Configuration management (`config` module)

pub mod auth;
pub mod confirmation;
pub mod keyring;
pub mod origin;
pub mod settings;
pub mod types;

#[cfg(feature = "persistence")]
pub mod config;

pub use auth::{AuthError, AuthRecord, AuthRegistry, AuthSnapshot};
pub use confirmation::{
    AuthorizeRequest, AuthorizeResult, Confirmation, ConfirmationItem, ConfirmationKind,
    ConfirmationOptions, ConfirmationPayload, ConfirmationQueue, ConfirmationResult,
    NetworkProposal, PendingConfirmation, PendingSnapshot, QueueError, SwitchNetworkRequest,
    TokenProposal, TransactionRequest, kind,
};
pub use keyring::{AccountList, Keyring, KeyringError, StaticKeyring};
pub use origin::{Origin, OriginError};
pub use settings::{ConnectionConfig, PhishingConfig, ProbeConfig};
pub use types::*;

#[cfg(feature = "persistence")]
pub use config::{AppConfig, ConfigError};
