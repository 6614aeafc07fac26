//! autofuse: background fusion lifecycle for wallets.
//!
//! Orchestrates CoinJoin-style fusion rounds per wallet: who is
//! auto-fusing, with which cached credential, how many rounds may queue,
//! and how everything winds down at exit without abandoning a round
//! mid-broadcast. The round protocol itself, wallet storage, and coin
//! eligibility rules all live behind two traits this crate consumes.
//!
//! # Architecture
//!
//! ```text
//! FusionController (application root owns one)
//!   │
//!   ├── CredentialCache     per-wallet password, re-validated on read
//!   ├── WalletRegistry      settings + FusionHandles per wallet
//!   │     └── autofuse loop   background task while enabled
//!   ├── EventNotifier       dedup'd observer broadcast
//!   └── Shutdown            broadcast that retires the loops
//!
//! external:  WalletBackend  passwords, coins, settings bag
//!            FusionEngine   runs the actual rounds
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use autofuse::{FusionController, WalletId};
//!
//! let controller = FusionController::new(backend, engine);
//! let wallet = WalletId::new("default");
//! if controller.add_wallet(&wallet, None) {
//!     // storage wants autofuse back on; prompt for the password first
//!     controller.enable_autofuse(&wallet, Some(&password)).await?;
//! }
//!
//! // manual fuse of specific coins
//! let handle = controller.start_fusion(&wallet, Some(&password), coins).await?;
//!
//! // at exit: stop everything and wait for in-flight rounds
//! controller.shutdown_all(&controller.wallets(), "closing wallet").await;
//! ```

pub mod backend;
pub mod controller;
pub mod credential;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
mod registry;
pub mod round;
pub mod runtime;
pub mod selector;
pub mod settings;

pub use backend::{Coin, CoinSnapshot, WalletBackend, WalletId};
pub use controller::{ControllerConfig, FusionController};
pub use credential::CredentialCache;
pub use engine::{FusionEngine, RoundOutcome, RoundSession};
pub use error::{FusionError, FusionResult};
pub use logging::init_logging;
pub use notify::{EventNotifier, FusionEvent};
pub use round::{FusionHandle, FusionStatus, RoundControl};
pub use runtime::Shutdown;
pub use settings::{CoinSelector, FusionSettings};
