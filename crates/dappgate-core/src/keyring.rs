//! Keyring contract.
//!
//! The mediation layer never touches key material. It observes the account
//! list and asks the keyring for a signature once the user approved a payload.

use crate::types::{Address, KeyringAccount, SignRequest};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyringError {
    #[error("Unknown account: {0}")]
    UnknownAccount(Address),

    #[error("Account {0} is signed externally")]
    ExternalAccount(Address),

    #[error("Keyring is locked")]
    Locked,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Signer error: {0}")]
    Signer(String),
}

/// Shared, immutable view of the account list.
pub type AccountList = Arc<Vec<KeyringAccount>>;

#[async_trait]
pub trait Keyring: Send + Sync {
    /// Observe the account list. The current value is available through `borrow()`.
    fn subscribe(&self) -> watch::Receiver<AccountList>;

    /// Produce a hex encoded signature for an approved payload.
    async fn sign(&self, request: &SignRequest, password: Option<&str>)
    -> Result<String, KeyringError>;

    /// Snapshot of the current accounts.
    fn accounts(&self) -> AccountList {
        self.subscribe().borrow().clone()
    }

    fn find(&self, address: &Address) -> Option<KeyringAccount> {
        self.accounts().iter().find(|a| &a.address == address).cloned()
    }
}

/// Observable account list without key material.
///
/// Every signature for these accounts has to come back from the UI, so
/// `sign` refuses with [`KeyringError::ExternalAccount`] or
/// [`KeyringError::Locked`].
pub struct StaticKeyring {
    accounts: watch::Sender<AccountList>,
}

impl StaticKeyring {
    pub fn new(accounts: Vec<KeyringAccount>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(accounts));
        Self { accounts: tx }
    }

    /// Add an account. Does not add duplicates.
    pub fn add_account(&self, account: KeyringAccount) -> bool {
        self.accounts.send_if_modified(|list| {
            if list.iter().any(|a| a.address == account.address) {
                return false;
            }
            let mut next = (**list).clone();
            next.push(account);
            *list = Arc::new(next);
            true
        })
    }

    /// Remove an account. Returns true if an account was removed.
    pub fn remove_account(&self, address: &Address) -> bool {
        self.accounts.send_if_modified(|list| {
            if !list.iter().any(|a| &a.address == address) {
                return false;
            }
            let next: Vec<_> = list.iter().filter(|a| &a.address != address).cloned().collect();
            *list = Arc::new(next);
            true
        })
    }

    pub fn set_hidden(&self, address: &Address, hidden: bool) -> bool {
        self.accounts.send_if_modified(|list| {
            let Some(pos) = list.iter().position(|a| &a.address == address) else {
                return false;
            };
            if list[pos].hidden == hidden {
                return false;
            }
            let mut next = (**list).clone();
            next[pos].hidden = hidden;
            *list = Arc::new(next);
            true
        })
    }
}

#[async_trait]
impl Keyring for StaticKeyring {
    fn subscribe(&self) -> watch::Receiver<AccountList> {
        self.accounts.subscribe()
    }

    async fn sign(
        &self,
        request: &SignRequest,
        _password: Option<&str>,
    ) -> Result<String, KeyringError> {
        let account = self
            .find(&request.address)
            .ok_or_else(|| KeyringError::UnknownAccount(request.address.clone()))?;
        if account.external {
            return Err(KeyringError::ExternalAccount(account.address));
        }
        Err(KeyringError::Locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyType, SignMethod};

    fn account(address: &str, external: bool) -> KeyringAccount {
        KeyringAccount {
            address: Address::new(address),
            name: None,
            key_type: KeyType::Ethereum,
            created_at: 1,
            hidden: false,
            external,
        }
    }

    #[test]
    fn test_add_and_remove_account() {
        let keyring = StaticKeyring::new(vec![]);
        let mut rx = keyring.subscribe();
        assert!(keyring.add_account(account("0x01", true)));
        assert!(!keyring.add_account(account("0x01", true)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        assert!(keyring.remove_account(&Address::new("0x01")));
        assert!(!keyring.remove_account(&Address::new("0x01")));
        assert!(keyring.accounts().is_empty());
    }

    #[test]
    fn test_set_hidden() {
        let keyring = StaticKeyring::new(vec![account("0x01", false)]);
        assert!(keyring.set_hidden(&Address::new("0x01"), true));
        assert!(!keyring.set_hidden(&Address::new("0x01"), true));
        assert!(keyring.accounts()[0].hidden);
    }

    #[tokio::test]
    async fn test_static_keyring_refuses_to_sign() {
        let keyring = StaticKeyring::new(vec![account("0x01", true), account("0x02", false)]);
        let mut request = SignRequest {
            address: Address::new("0x01"),
            method: SignMethod::PersonalSign,
            chain: None,
            data: serde_json::json!("0xdead"),
        };
        assert!(matches!(
            keyring.sign(&request, None).await,
            Err(KeyringError::ExternalAccount(_))
        ));
        request.address = Address::new("0x02");
        assert_eq!(keyring.sign(&request, None).await, Err(KeyringError::Locked));
        request.address = Address::new("0x03");
        assert!(matches!(
            keyring.sign(&request, None).await,
            Err(KeyringError::UnknownAccount(_))
        ));
    }
}
