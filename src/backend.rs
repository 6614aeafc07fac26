//! Seam to the external wallet library.
//!
//! The wallet owns keys, UTXOs, the password hash, and a settings bag;
//! this core only consumes narrow views of each. Frozen/immature/dust
//! rules stay on the wallet side: `eligible_coins` returns the already
//! filtered outcome.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identity for a wallet owned by the external wallet library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(pub String);

impl WalletId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A spendable output offered up for fusing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// `txid:vout` of the output.
    pub outpoint: String,
    pub value_sats: u64,
    pub confirmations: u32,
}

/// Outcome of the wallet-side eligibility query.
#[derive(Debug, Clone, Default)]
pub struct CoinSnapshot {
    /// Coins the wallet considers fusable right now.
    pub eligible: Vec<Coin>,
    /// How many spendable coins were excluded (frozen, immature, dust).
    pub ineligible: usize,
    /// Summed value of the eligible set, in sats.
    pub sum_value: u64,
    /// Whether any wallet coin is still unconfirmed. Gates autofuse when
    /// the wallet is set to fuse confirmed coins only.
    pub has_unconfirmed: bool,
}

#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Whether the wallet is password protected at all.
    fn has_password(&self, wallet: &WalletId) -> bool;

    /// Verify a password against the wallet's current credential. May
    /// touch disk; never called with a lock held.
    async fn check_password(&self, wallet: &WalletId, password: &str) -> bool;

    /// Coins currently eligible to fuse, per the wallet's own rules.
    async fn eligible_coins(&self, wallet: &WalletId) -> anyhow::Result<CoinSnapshot>;

    /// Read a value from the wallet's opaque settings bag.
    fn setting_get(&self, wallet: &WalletId, key: &str) -> Option<Value>;

    /// Write (or with `None`, clear) a value in the settings bag.
    fn setting_put(&self, wallet: &WalletId, key: &str, value: Option<Value>);
}
