//! Fusion round handles and the task that drives one round.
//!
//! A handle moves `Waiting → Running → {Complete, Failed}`. Stops are
//! cooperative: a waiting round is cancelled on the spot (nothing is
//! committed yet), a running round is only flagged `Stopping` and the
//! engine finishes its current step first, so external round state is
//! never torn mid-phase.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use crate::backend::{Coin, WalletId};
use crate::engine::{FusionEngine, RoundOutcome, RoundSession};

/// Lifecycle of one fusion round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStatus {
    /// Queued; no resources committed yet.
    Waiting,
    /// The engine is executing round steps.
    Running,
    /// Stop requested while running; finishes its current step first.
    Stopping,
    Stopped,
    Complete,
    Failed,
}

impl FusionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Complete | Self::Failed)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FusionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct HandleState {
    status: FusionStatus,
    extra: String,
    txid: Option<String>,
    stop_requested: bool,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One queued or in-progress fusion round. Shared read-only with
/// observers; all mutation goes through the lifecycle methods here.
#[derive(Debug)]
pub struct FusionHandle {
    id: u64,
    wallet: WalletId,
    started_at: DateTime<Utc>,
    self_fuse_players: u32,
    state: Mutex<HandleState>,
    stop_notify: Notify,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl FusionHandle {
    pub(crate) fn new(wallet: WalletId, self_fuse_players: u32) -> Arc<Self> {
        let (done_tx, done_rx) = watch::channel(false);
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            wallet,
            started_at: Utc::now(),
            self_fuse_players,
            state: Mutex::new(HandleState {
                status: FusionStatus::Waiting,
                extra: String::new(),
                txid: None,
                stop_requested: false,
            }),
            stop_notify: Notify::new(),
            done_tx,
            done_rx,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wallet(&self) -> &WalletId {
        &self.wallet
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn self_fuse_players(&self) -> u32 {
        self.self_fuse_players
    }

    /// `(status, status_extra)` snapshot for display.
    pub fn status(&self) -> (FusionStatus, String) {
        let state = self.lock();
        (state.status, state.extra.clone())
    }

    /// Fusion transaction id, once the round completed.
    pub fn txid(&self) -> Option<String> {
        self.lock().txid.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().status.is_terminal()
    }

    pub fn is_waiting(&self) -> bool {
        self.lock().status == FusionStatus::Waiting
    }

    /// Request a cooperative stop. A waiting round is cancelled on the
    /// spot; a running round is flagged and finishes its current step.
    /// Safe to call repeatedly and in any state.
    pub fn stop(&self, reason: &str) {
        let became_stopped = {
            let mut state = self.lock();
            state.stop_requested = true;
            match state.status {
                FusionStatus::Waiting => {
                    state.status = FusionStatus::Stopped;
                    state.extra = reason.to_owned();
                    true
                }
                FusionStatus::Running => {
                    state.status = FusionStatus::Stopping;
                    state.extra = reason.to_owned();
                    false
                }
                _ => false,
            }
        };
        if became_stopped {
            let _ = self.done_tx.send(true);
        }
        self.stop_notify.notify_one();
    }

    /// Wait until the round reaches a terminal state. Deliberately has no
    /// timeout: at shutdown, abandoning a round mid-broadcast is worse
    /// than a slow exit.
    pub async fn join(&self) {
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- driver/engine-side transitions ---------------------------------

    fn set_running(&self) -> bool {
        let mut state = self.lock();
        match state.status {
            FusionStatus::Waiting => {
                state.status = FusionStatus::Running;
                true
            }
            FusionStatus::Running | FusionStatus::Stopping => true,
            // stop() won the race before anything was committed
            _ => false,
        }
    }

    fn set_extra(&self, extra: &str) {
        let mut state = self.lock();
        if state.status.is_live() {
            state.extra = extra.to_owned();
        }
    }

    fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    fn finish(&self, status: FusionStatus, extra: String, txid: Option<String>) {
        {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = status;
            state.extra = extra;
            if txid.is_some() {
                state.txid = txid;
            }
        }
        let _ = self.done_tx.send(true);
    }

    /// Pending until `stop` cancels this round while it is still waiting.
    /// Never resolves once the round is running; the engine handles stops
    /// from there.
    async fn cancelled_while_waiting(&self) {
        loop {
            self.stop_notify.notified().await;
            if self.lock().status == FusionStatus::Stopped {
                return;
            }
        }
    }
}

/// Engine-facing view of a handle: status transitions in, stop requests
/// out. Only constructed by the round driver.
#[derive(Clone)]
pub struct RoundControl {
    handle: Arc<FusionHandle>,
}

impl RoundControl {
    /// Mark the round running. Returns false when the round was cancelled
    /// before anything was committed; the engine must then return
    /// [`RoundOutcome::Stopped`] without doing work.
    pub fn set_running(&self) -> bool {
        self.handle.set_running()
    }

    /// Progress text shown alongside the status.
    pub fn set_extra(&self, extra: &str) {
        self.handle.set_extra(extra)
    }

    /// Engines check this between atomic steps and wind down when set.
    pub fn stop_requested(&self) -> bool {
        self.handle.stop_requested()
    }
}

/// Spawn the task that drives one round through the engine. Nothing
/// escapes the task as an error: outcomes and failures both land in the
/// handle's status.
pub(crate) fn spawn_round(
    handle: Arc<FusionHandle>,
    engine: Arc<dyn FusionEngine>,
    password: Option<String>,
    coins: Vec<Coin>,
) {
    let session = RoundSession {
        wallet: handle.wallet().clone(),
        password,
        coins,
        self_fuse_players: handle.self_fuse_players(),
        control: RoundControl {
            handle: handle.clone(),
        },
    };
    tokio::spawn(async move {
        tokio::select! {
            result = engine.run_round(session) => match result {
                Ok(RoundOutcome::Fused { txid }) => {
                    info!(wallet = %handle.wallet(), %txid, "fusion round complete");
                    let extra = format!("fused in tx {txid}");
                    handle.finish(FusionStatus::Complete, extra, Some(txid));
                }
                Ok(RoundOutcome::Stopped) => {
                    info!(wallet = %handle.wallet(), "fusion round stopped");
                    let reason = handle.status().1;
                    handle.finish(FusionStatus::Stopped, reason, None);
                }
                Err(e) => {
                    warn!(wallet = %handle.wallet(), error = %e, "fusion round failed");
                    handle.finish(FusionStatus::Failed, e.to_string(), None);
                }
            },
            _ = handle.cancelled_while_waiting() => {
                // cancelled before the engine committed anything; stop()
                // already recorded the terminal state
            }
        }
    });
}
