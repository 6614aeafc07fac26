//! Shared test doubles: an in-memory wallet backend and a scriptable
//! fusion engine.
//!
//! The engine's behavior is scripted per round by the first coin's
//! outpoint, so concurrent rounds never race over which behavior they
//! get:
//!
//! - `hold:*`  stay waiting until released or stopped
//! - `run:*`   go running, then hold until released or stopped
//! - `slow:*`  go running; on stop, finish one last step then complete
//! - `fast:*`  complete immediately
//! - `fail:m`  error out with message `m`

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autofuse::{
    Coin, CoinSnapshot, ControllerConfig, FusionController, FusionEngine, RoundOutcome,
    RoundSession, WalletBackend, WalletId,
};
use once_cell::sync::Lazy;
use serde_json::Value;

static TRACING: Lazy<()> = Lazy::new(autofuse::init_logging);

pub fn coin(outpoint: &str, value_sats: u64, confirmations: u32) -> Coin {
    Coin {
        outpoint: outpoint.to_string(),
        value_sats,
        confirmations,
    }
}

pub fn snapshot(coins: Vec<Coin>, has_unconfirmed: bool) -> CoinSnapshot {
    let sum_value = coins.iter().map(|c| c.value_sats).sum();
    CoinSnapshot {
        eligible: coins,
        ineligible: 0,
        sum_value,
        has_unconfirmed,
    }
}

#[derive(Default)]
pub struct MockBackend {
    passwords: Mutex<HashMap<WalletId, String>>,
    snapshots: Mutex<HashMap<WalletId, CoinSnapshot>>,
    settings: Mutex<HashMap<(WalletId, String), Value>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the wallet password protected.
    pub fn protect(&self, wallet: &WalletId, password: &str) {
        self.passwords
            .lock()
            .unwrap()
            .insert(wallet.clone(), password.to_string());
    }

    /// Change the wallet's password out from under any cached copy.
    pub fn rotate_password(&self, wallet: &WalletId, new_password: &str) {
        self.protect(wallet, new_password);
    }

    pub fn set_coins(&self, wallet: &WalletId, snapshot: CoinSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(wallet.clone(), snapshot);
    }

    pub fn stored(&self, wallet: &WalletId, key: &str) -> Option<Value> {
        self.settings
            .lock()
            .unwrap()
            .get(&(wallet.clone(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl WalletBackend for MockBackend {
    fn has_password(&self, wallet: &WalletId) -> bool {
        self.passwords.lock().unwrap().contains_key(wallet)
    }

    async fn check_password(&self, wallet: &WalletId, password: &str) -> bool {
        self.passwords
            .lock()
            .unwrap()
            .get(wallet)
            .map_or(true, |current| current == password)
    }

    async fn eligible_coins(&self, wallet: &WalletId) -> anyhow::Result<CoinSnapshot> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_default())
    }

    fn setting_get(&self, wallet: &WalletId, key: &str) -> Option<Value> {
        self.stored(wallet, key)
    }

    fn setting_put(&self, wallet: &WalletId, key: &str, value: Option<Value>) {
        let mut settings = self.settings.lock().unwrap();
        match value {
            Some(value) => {
                settings.insert((wallet.clone(), key.to_string()), value);
            }
            None => {
                settings.remove(&(wallet.clone(), key.to_string()));
            }
        }
    }
}

pub struct MockEngine {
    started: AtomicUsize,
    release_tx: tokio::sync::watch::Sender<bool>,
    release_rx: tokio::sync::watch::Receiver<bool>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            started: AtomicUsize::new(0),
            release_tx,
            release_rx,
        })
    }

    /// Let every held round finish as fused.
    pub fn release_all(&self) {
        let _ = self.release_tx.send(true);
    }

    /// How many rounds reached the engine.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FusionEngine for MockEngine {
    async fn run_round(&self, session: RoundSession) -> anyhow::Result<RoundOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let directive = session
            .coins
            .first()
            .map(|c| c.outpoint.clone())
            .unwrap_or_default();

        if let Some(message) = directive.strip_prefix("fail:") {
            anyhow::bail!("{message}");
        }
        if directive.starts_with("fast:") {
            if !session.control.set_running() {
                return Ok(RoundOutcome::Stopped);
            }
            return Ok(RoundOutcome::Fused {
                txid: format!("txid-{directive}"),
            });
        }
        if directive.starts_with("run:") || directive.starts_with("slow:") {
            if !session.control.set_running() {
                return Ok(RoundOutcome::Stopped);
            }
            session.control.set_extra("mixing");
        }

        let mut release = self.release_rx.clone();
        loop {
            if session.control.stop_requested() {
                if directive.starts_with("slow:") {
                    // finish the in-flight step before honoring the stop
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return Ok(RoundOutcome::Fused {
                        txid: format!("txid-{directive}"),
                    });
                }
                return Ok(RoundOutcome::Stopped);
            }
            if *release.borrow() {
                if !session.control.set_running() {
                    return Ok(RoundOutcome::Stopped);
                }
                return Ok(RoundOutcome::Fused {
                    txid: format!("txid-{directive}"),
                });
            }
            tokio::select! {
                _ = release.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }
    }
}

/// Controller wired to the mocks, with a fast autofuse poll for tests.
pub fn controller(backend: Arc<MockBackend>, engine: Arc<MockEngine>) -> FusionController {
    Lazy::force(&TRACING);
    FusionController::with_config(
        backend,
        engine,
        ControllerConfig::new().with_poll_interval(Duration::from_millis(10)),
    )
}

/// Poll a condition for up to two seconds before giving up.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
