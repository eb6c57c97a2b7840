//! Origin authorization registry.
//!
//! Records are immutable once published: every mutation clones the map,
//! replaces whole records and swaps the snapshot in one step, so concurrent
//! readers see either the old or the new record and never a half-written one.
//! The same watch channel doubles as the change feed for account
//! subscriptions.

use crate::confirmation::{ConfirmationQueue, QueueError};
use crate::keyring::Keyring;
use crate::origin::Origin;
use crate::types::{Address, ChainFamily, ChainSlug, KeyType, KeyringAccount};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0} has not been authorized")]
    NotFound(Origin),

    #[error("{0} already has a pending authorization request")]
    AlreadyPending(Origin),

    #[error("No accounts available for {0:?}")]
    NoCompatibleAccounts(Vec<ChainFamily>),

    #[error("At least one chain family must be requested")]
    NoFamilies,

    #[error("Confirmation queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Permission state of one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    pub origin: Origin,
    #[serde(default)]
    pub name: Option<String>,
    pub is_allowed: bool,
    pub allowed_addresses: BTreeMap<Address, bool>,
    pub granted_families: BTreeSet<ChainFamily>,
    pub current_account: BTreeMap<ChainFamily, Address>,
    pub current_chain: BTreeMap<ChainFamily, ChainSlug>,
    pub allow_substrate_ecdsa_bridging: bool,
}

impl AuthRecord {
    fn new(origin: Origin, name: Option<String>) -> Self {
        Self {
            origin,
            name,
            is_allowed: false,
            allowed_addresses: BTreeMap::new(),
            granted_families: BTreeSet::new(),
            current_account: BTreeMap::new(),
            current_chain: BTreeMap::new(),
            allow_substrate_ecdsa_bridging: false,
        }
    }

    pub fn is_address_allowed(&self, address: &Address) -> bool {
        self.allowed_addresses.get(address).copied().unwrap_or(false)
    }

    pub fn has_family(&self, family: ChainFamily) -> bool {
        self.is_allowed && self.granted_families.contains(&family)
    }

    /// Drop entries for accounts the keyring no longer holds.
    fn pruned(&self, keyring: &HashSet<&Address>) -> Option<AuthRecord> {
        let stale = self.allowed_addresses.keys().any(|a| !keyring.contains(a))
            || self.current_account.values().any(|a| !keyring.contains(a));
        if !stale {
            return None;
        }
        let mut next = self.clone();
        next.allowed_addresses.retain(|a, _| keyring.contains(a));
        next.current_account.retain(|_, a| keyring.contains(a));
        Some(next)
    }

    /// Whether an account may appear in a listing for `family`.
    fn lists_for(&self, account: &KeyringAccount, family: ChainFamily) -> bool {
        if !account.key_type.supports(family) {
            return false;
        }
        // Ethereum keys only leak into Polkadot-SDK listings once bridging was granted.
        if family == ChainFamily::Substrate && account.key_type == KeyType::Ethereum {
            return self.allow_substrate_ecdsa_bridging;
        }
        true
    }

    fn refresh_current_accounts(&mut self, accounts: &[KeyringAccount]) {
        for family in self.granted_families.clone() {
            let still_valid = self
                .current_account
                .get(&family)
                .is_some_and(|a| self.is_address_allowed(a));
            if still_valid {
                continue;
            }
            let first = accounts
                .iter()
                .filter(|a| self.is_address_allowed(&a.address) && self.lists_for(a, family))
                .min_by_key(|a| a.created_at)
                .map(|a| a.address.clone());
            match first {
                Some(address) => {
                    self.current_account.insert(family, address);
                }
                None => {
                    self.current_account.remove(&family);
                }
            }
        }
        self.current_account
            .retain(|family, _| self.granted_families.contains(family));
    }
}

/// Immutable view of every record.
pub type AuthSnapshot = Arc<BTreeMap<Origin, Arc<AuthRecord>>>;

/// Per-origin permission registry.
pub struct AuthRegistry {
    records: watch::Sender<AuthSnapshot>,
    keyring: Arc<dyn Keyring>,
    queue: ConfirmationQueue,
    pending: Mutex<HashSet<Origin>>,
}

/// Clears the per-origin pending marker when the handshake ends, however it ends.
struct PendingGuard<'a> {
    registry: &'a AuthRegistry,
    origin: Origin,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.registry.pending.lock() {
            pending.remove(&self.origin);
        }
    }
}

impl AuthRegistry {
    pub fn new(keyring: Arc<dyn Keyring>, queue: ConfirmationQueue) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(BTreeMap::new()));
        Self {
            records: tx,
            keyring,
            queue,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn keyring(&self) -> &Arc<dyn Keyring> {
        &self.keyring
    }

    /// Observe every mutation of the registry.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.records.subscribe()
    }

    /// All records, pruned against the current keyring.
    pub fn snapshot(&self) -> Vec<Arc<AuthRecord>> {
        let snapshot = self.records.borrow().clone();
        snapshot
            .keys()
            .filter_map(|origin| self.get_auth_record(origin))
            .collect()
    }

    /// Record for an origin. Accounts removed from the keyring never show up,
    /// even before the background prune has run.
    pub fn get_auth_record(&self, origin: &Origin) -> Option<Arc<AuthRecord>> {
        let record = self.records.borrow().get(origin).cloned()?;
        let accounts = self.keyring.accounts();
        let present: HashSet<&Address> = accounts.iter().map(|a| &a.address).collect();
        match record.pruned(&present) {
            Some(pruned) => Some(Arc::new(pruned)),
            None => Some(record),
        }
    }

    /// Run the authorization handshake for `families`.
    ///
    /// Returns `Ok(true)` when access is (already) granted and `Ok(false)`
    /// when the user declined.
    pub async fn authorize(
        &self,
        origin: &Origin,
        name: Option<String>,
        families: &[ChainFamily],
        reconfirm: bool,
    ) -> Result<bool, AuthError> {
        if families.is_empty() {
            return Err(AuthError::NoFamilies);
        }
        let families: Vec<ChainFamily> = families
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if let Some(record) = self.get_auth_record(origin)
            && !reconfirm
            && record.is_allowed
            && families.iter().all(|f| record.granted_families.contains(f))
        {
            return Ok(true);
        }

        let offered: Vec<KeyringAccount> = self
            .keyring
            .accounts()
            .iter()
            .filter(|a| !a.hidden && a.supports_any(&families))
            .cloned()
            .collect();
        if offered.is_empty() {
            return Err(AuthError::NoCompatibleAccounts(families));
        }

        let _guard = self.mark_pending(origin)?;
        let pending = self.queue.enqueue_authorize(
            origin.clone(),
            name.clone(),
            families.clone(),
            offered.clone(),
            reconfirm,
        )?;
        tracing::info!(
            "Authorization requested by {} for {:?} ({} accounts offered)",
            origin,
            families,
            offered.len()
        );

        let result = pending.resolution().await?;
        if !result.is_approved {
            tracing::info!("Authorization for {} declined", origin);
            return Ok(false);
        }

        let selected: HashSet<Address> = result.accounts.into_iter().collect();
        let accounts = self.keyring.accounts();
        self.mutate(origin, true, |record| {
            if record.name.is_none() {
                record.name = name;
            }
            record.is_allowed = true;
            let earlier: Vec<ChainFamily> = record
                .granted_families
                .iter()
                .copied()
                .filter(|f| !families.contains(f))
                .collect();
            for account in &offered {
                // A plain handshake for a new family leaves grants made for other families alone.
                let kept = !reconfirm
                    && record.is_address_allowed(&account.address)
                    && earlier.iter().any(|f| account.key_type.supports(*f));
                record.allowed_addresses.insert(
                    account.address.clone(),
                    kept || selected.contains(&account.address),
                );
            }
            record.granted_families.extend(families.iter().copied());
            if families.contains(&ChainFamily::Substrate)
                && offered
                    .iter()
                    .any(|a| a.key_type == KeyType::Ethereum && selected.contains(&a.address))
            {
                record.allow_substrate_ecdsa_bridging = true;
            }
            record.refresh_current_accounts(&accounts);
        })?;
        tracing::info!("Authorized {} with {} account(s)", origin, selected.len());
        Ok(true)
    }

    /// Update the allowed flag of accounts compatible with `family`.
    pub fn set_allowed_addresses(
        &self,
        origin: &Origin,
        family: ChainFamily,
        changes: &BTreeMap<Address, bool>,
    ) -> Result<(), AuthError> {
        let accounts = self.keyring.accounts();
        self.mutate(origin, false, |record| {
            for account in accounts.iter().filter(|a| a.key_type.supports(family)) {
                if let Some(allowed) = changes.get(&account.address) {
                    record
                        .allowed_addresses
                        .insert(account.address.clone(), *allowed);
                }
            }
            record.refresh_current_accounts(&accounts);
        })
    }

    /// Withdraw a chain family from an origin.
    pub fn revoke_family(&self, origin: &Origin, family: ChainFamily) -> Result<(), AuthError> {
        let accounts = self.keyring.accounts();
        self.mutate(origin, false, |record| {
            record.granted_families.remove(&family);
            record.current_account.remove(&family);
            record.current_chain.remove(&family);
            if family == ChainFamily::Substrate {
                record.allow_substrate_ecdsa_bridging = false;
            }
            let granted = record.granted_families.clone();
            for account in accounts.iter() {
                let still_used = account.key_type.families().iter().any(|f| granted.contains(f));
                if !still_used && record.allowed_addresses.contains_key(&account.address) {
                    record.allowed_addresses.insert(account.address.clone(), false);
                }
            }
            record.refresh_current_accounts(&accounts);
        })
    }

    /// Remove every trace of an origin. Returns true if a record existed.
    pub fn forget(&self, origin: &Origin) -> bool {
        let removed = self.records.send_if_modified(|snapshot| {
            if !snapshot.contains_key(origin) {
                return false;
            }
            let mut next = (**snapshot).clone();
            next.remove(origin);
            *snapshot = Arc::new(next);
            true
        });
        if removed {
            tracing::info!("Forgot authorization for {}", origin);
        }
        removed
    }

    /// Select the chain an origin is working on for a family.
    pub fn set_current_chain(
        &self,
        origin: &Origin,
        family: ChainFamily,
        chain: ChainSlug,
    ) -> Result<(), AuthError> {
        self.mutate(origin, false, |record| {
            record.current_chain.insert(family, chain);
        })
    }

    /// Select the active account of an origin for a family. Only allowed accounts qualify.
    pub fn set_current_account(
        &self,
        origin: &Origin,
        family: ChainFamily,
        address: Address,
    ) -> Result<bool, AuthError> {
        let mut accepted = false;
        self.mutate(origin, false, |record| {
            if record.is_address_allowed(&address) {
                record.current_account.insert(family, address);
                accepted = true;
            }
        })?;
        Ok(accepted)
    }

    /// Accounts an origin may see, oldest first.
    ///
    /// With `any_type` set the family filter is skipped; hidden and
    /// non-allowed accounts are still excluded.
    pub fn list_accounts_for(
        &self,
        origin: &Origin,
        families: &[ChainFamily],
        any_type: bool,
    ) -> Vec<KeyringAccount> {
        let Some(record) = self.get_auth_record(origin) else {
            return Vec::new();
        };
        if !record.is_allowed {
            return Vec::new();
        }

        let mut accounts: Vec<KeyringAccount> = self
            .keyring
            .accounts()
            .iter()
            .filter(|a| !a.hidden && record.is_address_allowed(&a.address))
            .filter(|a| {
                any_type
                    || families
                        .iter()
                        .any(|f| record.granted_families.contains(f) && record.lists_for(a, *f))
            })
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }

    /// Remove entries for accounts that left the keyring from every record.
    pub fn prune_removed_accounts(&self) {
        let accounts = self.keyring.accounts();
        let present: HashSet<&Address> = accounts.iter().map(|a| &a.address).collect();
        let changed = self.records.send_if_modified(|snapshot| {
            let mut next = (**snapshot).clone();
            let mut changed = false;
            for record in next.values_mut() {
                if let Some(mut pruned) = record.pruned(&present) {
                    pruned.refresh_current_accounts(&accounts);
                    *record = Arc::new(pruned);
                    changed = true;
                }
            }
            if changed {
                *snapshot = Arc::new(next);
            }
            changed
        });
        if changed {
            tracing::debug!("Pruned removed accounts from authorization records");
        }
    }

    /// Keep records in step with the keyring for as long as the registry lives.
    pub fn spawn_keyring_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let mut accounts = self.keyring.subscribe();
        tokio::spawn(async move {
            while accounts.changed().await.is_ok() {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.prune_removed_accounts();
            }
        })
    }

    fn mark_pending(&self, origin: &Origin) -> Result<PendingGuard<'_>, AuthError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| AuthError::Queue(QueueError::Poisoned))?;
        if !pending.insert(origin.clone()) {
            return Err(AuthError::AlreadyPending(origin.clone()));
        }
        Ok(PendingGuard {
            registry: self,
            origin: origin.clone(),
        })
    }

    /// Copy-on-write update of one record.
    fn mutate<F>(&self, origin: &Origin, create: bool, f: F) -> Result<(), AuthError>
    where
        F: FnOnce(&mut AuthRecord),
    {
        let mut missing = false;
        self.records.send_if_modified(|snapshot| {
            let mut record = match snapshot.get(origin) {
                Some(existing) => (**existing).clone(),
                None if create => AuthRecord::new(origin.clone(), None),
                None => {
                    missing = true;
                    return false;
                }
            };
            f(&mut record);
            let mut next = (**snapshot).clone();
            next.insert(origin.clone(), Arc::new(record));
            *snapshot = Arc::new(next);
            true
        });
        if missing {
            return Err(AuthError::NotFound(origin.clone()));
        }
        Ok(())
    }
}
