//! Seam to the external fusion-round engine.
//!
//! The round protocol (tiers, pools, blind signatures, phases) is someone
//! else's problem: one `run_round` call covers a whole round, reporting
//! progress back through the session's [`RoundControl`]. The engine is
//! expected to check `stop_requested` between atomic steps and wind down
//! cleanly; it is never interrupted mid-step and never retried on error.

use async_trait::async_trait;

use crate::backend::{Coin, WalletId};
use crate::round::RoundControl;

/// Everything the engine needs to run one round.
pub struct RoundSession {
    pub wallet: WalletId,
    /// Wallet password for signing, `None` for unprotected wallets.
    pub password: Option<String>,
    pub coins: Vec<Coin>,
    /// How many players this wallet may enter the round as.
    pub self_fuse_players: u32,
    /// Hook back into the lifecycle: status transitions in, stop requests
    /// out.
    pub control: RoundControl,
}

/// How a round ended, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Round completed and broadcast the fusion transaction.
    Fused { txid: String },
    /// The engine honored a stop request between steps.
    Stopped,
}

#[async_trait]
pub trait FusionEngine: Send + Sync {
    async fn run_round(&self, session: RoundSession) -> anyhow::Result<RoundOutcome>;
}
