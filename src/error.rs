//! Error taxonomy for fusion lifecycle operations.
//!
//! Everything here is returned synchronously from the operation that
//! detected it. Failures inside a background round never surface as
//! errors; they land in the round handle's status instead.

use thiserror::Error;

use crate::backend::WalletId;

#[derive(Debug, Error)]
pub enum FusionError {
    /// Password failed the wallet's credential check. Callers typically
    /// re-prompt.
    #[error("invalid password for wallet {0}")]
    InvalidCredential(WalletId),

    /// Coin selection produced nothing worth fusing.
    #[error("no eligible coins to fuse")]
    IneligibleCoins,

    /// The wallet already has `limit` queued or running fusions. Raise the
    /// limit or wait for one to finish.
    #[error("fusion queue full (limit {limit})")]
    QueueFull { limit: u32 },

    /// Wallet was never registered with `add_wallet`.
    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),

    /// Opaque failure from an external collaborator (wallet backend or
    /// round engine). Surfaced verbatim, never retried here.
    #[error("external: {0}")]
    External(String),
}

pub type FusionResult<T> = Result<T, FusionError>;
