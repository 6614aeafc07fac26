//! Cached wallet passwords, re-validated on every read.
//!
//! At most one entry per wallet, held only in memory for the life of the
//! process. There is no expiry timer: an entry leaves the cache when a
//! re-validation fails (the wallet's password changed underneath us) or
//! the process ends. Stored passwords are zeroized on drop.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use zeroize::Zeroizing;

use crate::backend::{WalletBackend, WalletId};

#[derive(Default)]
pub struct CredentialCache {
    entries: Mutex<HashMap<WalletId, Zeroizing<String>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(has_password, password)` for the wallet. Unprotected wallets
    /// always yield `(false, None)`; a required-but-unknown (or no longer
    /// valid) password yields `(true, None)`. Never fails: a stale entry
    /// is evicted and reported as a miss, and the caller re-prompts.
    pub async fn get(&self, backend: &dyn WalletBackend, wallet: &WalletId) -> (bool, Option<String>) {
        if !backend.has_password(wallet) {
            return (false, None);
        }
        // copy the candidate out so no lock spans the disk-touching check
        let cached = self
            .lock()
            .get(wallet)
            .map(|password| password.as_str().to_owned());
        let Some(password) = cached else {
            return (true, None);
        };
        if backend.check_password(wallet, &password).await {
            (true, Some(password))
        } else {
            tracing::debug!(%wallet, "cached password failed re-validation, evicting");
            self.evict(wallet);
            (true, None)
        }
    }

    /// Store a password the caller has already validated, replacing any
    /// previous entry. No validation happens here.
    pub fn cache(&self, wallet: &WalletId, password: &str) {
        self.lock()
            .insert(wallet.clone(), Zeroizing::new(password.to_owned()));
    }

    pub fn evict(&self, wallet: &WalletId) {
        self.lock().remove(wallet);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WalletId, Zeroizing<String>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
