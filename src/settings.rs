//! Per-wallet fusion settings.
//!
//! Settings persist as individual opaque JSON values in the wallet's own
//! settings bag, so a wallet carries its fusion preferences wherever the
//! wallet file goes. The in-memory `enabled` flag is runtime state: the
//! persisted flag only records that the user wants autofuse back next
//! session (re-enabling still requires the password).

use serde::{Deserialize, Serialize};

use crate::backend::{WalletBackend, WalletId};

pub const KEY_AUTOFUSE: &str = "fusion_autofuse";
pub const KEY_QUEUED_LIMIT: &str = "fusion_queued_autofuse";
pub const KEY_SELF_FUSE: &str = "fusion_self_fuse_players";
pub const KEY_CONFIRMED_ONLY: &str = "fusion_confirmed_only";
pub const KEY_SELECTOR: &str = "fusion_selector";

pub const DEFAULT_QUEUED_LIMIT: u32 = 4;
pub const MAX_QUEUED_LIMIT: u32 = 10;
pub const DEFAULT_SELF_FUSE_PLAYERS: u32 = 1;
pub const MAX_SELF_FUSE_PLAYERS: u32 = 2;

/// How auto-fusion picks coins each pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum CoinSelector {
    /// Target typical output amount, in sats.
    Size(u64),
    /// Target number of coins kept in the wallet.
    Count(u64),
    /// Per-coin random chance, 0.0 to 1.0.
    Fraction(f64),
}

impl Default for CoinSelector {
    fn default() -> Self {
        Self::Fraction(0.1)
    }
}

/// Fusion settings for one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionSettings {
    /// Runtime autofuse flag; true iff a background loop is live.
    pub enabled: bool,
    /// Max queued/running fusions at once, 1..=MAX_QUEUED_LIMIT.
    pub queued_limit: u32,
    /// How many players this wallet may enter a single round as (1 or 2).
    pub self_fuse_players: u32,
    /// Only autofuse once every wallet coin is confirmed.
    pub confirmed_only: bool,
    pub selector: CoinSelector,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            queued_limit: DEFAULT_QUEUED_LIMIT,
            self_fuse_players: DEFAULT_SELF_FUSE_PLAYERS,
            confirmed_only: false,
            selector: CoinSelector::default(),
        }
    }
}

impl FusionSettings {
    /// Load from the wallet's settings bag. Missing or malformed values
    /// fall back per key, so one bad entry never poisons the rest.
    pub fn load(backend: &dyn WalletBackend, wallet: &WalletId) -> Self {
        let mut settings = Self::default();
        if let Some(v) = backend.setting_get(wallet, KEY_AUTOFUSE) {
            settings.enabled = v.as_bool().unwrap_or(false);
        }
        if let Some(n) = backend.setting_get(wallet, KEY_QUEUED_LIMIT).and_then(|v| v.as_u64()) {
            settings.queued_limit = (n as u32).clamp(1, MAX_QUEUED_LIMIT);
        }
        if let Some(n) = backend.setting_get(wallet, KEY_SELF_FUSE).and_then(|v| v.as_u64()) {
            settings.self_fuse_players = (n as u32).clamp(1, MAX_SELF_FUSE_PLAYERS);
        }
        if let Some(v) = backend.setting_get(wallet, KEY_CONFIRMED_ONLY) {
            settings.confirmed_only = v.as_bool().unwrap_or(false);
        }
        if let Some(v) = backend.setting_get(wallet, KEY_SELECTOR) {
            if let Ok(selector) = serde_json::from_value(v) {
                settings.selector = selector;
            }
        }
        settings
    }
}
