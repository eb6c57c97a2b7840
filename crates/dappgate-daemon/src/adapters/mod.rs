//! Chain-family adapters.
//!
//! Each adapter resolves the caller's current chain and accounts from the
//! authorization registry, asks for confirmation before anything that
//! changes state or reveals data, and reaches the chain through the
//! connection manager.

mod cardano;
mod evm;
mod substrate;

pub use cardano::CardanoAdapter;
pub use evm::EvmAdapter;
pub use substrate::SubstrateAdapter;

use crate::context::Services;
use crate::error::ProviderError;
use dappgate_chain::{ChainBackend, ChainInfo, select_strategy};
use dappgate_core::{
    Address, ChainFamily, ConfirmationOptions, KeyringAccount, Origin, SignMethod, SignRequest,
    kind,
};
use std::sync::Arc;

/// Chain the origin is working on for `family`.
pub(crate) fn current_chain(
    services: &Services,
    origin: &Origin,
    family: ChainFamily,
) -> Result<Arc<ChainInfo>, ProviderError> {
    let selected = services
        .registry
        .get_auth_record(origin)
        .and_then(|r| r.current_chain.get(&family).cloned());
    match selected {
        Some(slug) => services
            .chains
            .get(&slug)
            .ok_or(ProviderError::UnrecognizedChain(slug)),
        None => services
            .default_chain(family)
            .ok_or_else(|| ProviderError::UnrecognizedChain(format!("no {} chain configured", family))),
    }
}

/// Accounts the origin may use for `family`, current account first.
pub(crate) fn permitted_accounts(services: &Services, origin: &Origin, family: ChainFamily) -> Vec<Address> {
    let mut accounts: Vec<Address> = services
        .registry
        .list_accounts_for(origin, &[family], false)
        .into_iter()
        .map(|a| a.address)
        .collect();
    let current = services
        .registry
        .get_auth_record(origin)
        .and_then(|r| r.current_account.get(&family).cloned());
    if let Some(current) = current
        && let Some(pos) = accounts.iter().position(|a| *a == current)
    {
        let selected = accounts.remove(pos);
        accounts.insert(0, selected);
    }
    accounts
}

/// Keyring entry for an address the origin may use on `family`.
///
/// The address must show up in the origin's listing for that family, so a
/// key granted to one protocol never signs for another.
pub(crate) fn allowed_account(
    services: &Services,
    origin: &Origin,
    family: ChainFamily,
    address: &Address,
) -> Result<KeyringAccount, ProviderError> {
    services
        .registry
        .list_accounts_for(origin, &[family], false)
        .into_iter()
        .find(|a| &a.address == address)
        .ok_or(ProviderError::Unauthorized)
}

/// Live backend for a chain, creating the connection on first use.
pub(crate) async fn backend_for(
    services: &Services,
    chain: &ChainInfo,
) -> Result<Arc<dyn ChainBackend>, ProviderError> {
    let key = services.connect_chain(chain)?;
    Ok(services.connections.backend(&key).await?)
}

/// Backend for a value-revealing call.
///
/// A dropped connection without push support fails at once instead of
/// waiting for a reconnect that would hand back data the page cannot trust.
pub(crate) async fn revealing_backend(
    services: &Services,
    chain: &ChainInfo,
) -> Result<Arc<dyn ChainBackend>, ProviderError> {
    let key = services.connect_chain(chain)?;
    if let Some(backend) = services.connections.try_backend(&key) {
        return Ok(backend);
    }
    let push = services
        .connections
        .info(&key)
        .and_then(|i| i.endpoint)
        .and_then(|url| select_strategy(&url).ok())
        .is_some_and(|s| s.supports_push());
    if !push {
        return Err(ProviderError::ChainDisconnected(chain.slug.clone()));
    }
    Ok(services.connections.backend(&key).await?)
}

fn declined(method: SignMethod) -> ProviderError {
    match method {
        SignMethod::CardanoTx => ProviderError::TxSignDeclined,
        SignMethod::CardanoData => ProviderError::DataSignDeclined,
        _ => ProviderError::UserRejected,
    }
}

/// Ask the user to approve a signature, then produce it.
///
/// External accounts get the signature back from the UI with the approval;
/// keyring accounts sign with the password supplied on approval.
pub(crate) async fn sign_with_confirmation(
    services: &Services,
    origin: &Origin,
    request: SignRequest,
) -> Result<String, ProviderError> {
    let account = allowed_account(services, origin, request.method.family(), &request.address)?;
    let options = ConfirmationOptions {
        required_password: !account.external,
        address: Some(request.address.clone()),
        chain: request.chain.clone(),
    };
    let method = request.method;

    if account.external {
        let pending = services.queue.enqueue::<kind::SignatureRequestExternal>(
            origin.clone(),
            request,
            options,
        )?;
        let result = pending.resolution().await?;
        if !result.is_approved {
            return Err(declined(method));
        }
        return result
            .signature
            .ok_or_else(|| ProviderError::Internal("approval carried no signature".to_string()));
    }

    let pending = services
        .queue
        .enqueue::<kind::SignatureRequest>(origin.clone(), request.clone(), options)?;
    let result = pending.resolution().await?;
    if !result.is_approved {
        return Err(declined(method));
    }
    Ok(services
        .registry
        .keyring()
        .sign(&request, result.password.as_deref())
        .await?)
}
