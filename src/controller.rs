//! The application-facing fusion lifecycle controller.
//!
//! One explicitly constructed instance per application, handed the two
//! external collaborators at build time. No global state: whoever owns
//! the controller owns every background task it spawns.
//!
//! # Lifecycle
//!
//! ```text
//! add_wallet ──► slot in registry (settings loaded from the wallet bag)
//!    │
//!    ├── enable_autofuse ──► credential check ──► cache ──► loop task
//!    │        loop: top the queue up to queued_limit while enabled
//!    │
//!    ├── start_fusion ──► FusionHandle (Waiting) ──► round driver task
//!    │
//!    └── shutdown_all ──► stop every live handle ──► join (no timeout)
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::backend::{Coin, CoinSnapshot, WalletBackend, WalletId};
use crate::credential::CredentialCache;
use crate::engine::FusionEngine;
use crate::error::{FusionError, FusionResult};
use crate::notify::{EventNotifier, FusionEvent};
use crate::registry::{SlotCell, WalletRegistry};
use crate::round::{spawn_round, FusionHandle};
use crate::runtime::Shutdown;
use crate::selector::pick_coins;
use crate::settings::{
    CoinSelector, FusionSettings, KEY_AUTOFUSE, KEY_CONFIRMED_ONLY, KEY_QUEUED_LIMIT, KEY_SELECTOR,
    KEY_SELF_FUSE, MAX_QUEUED_LIMIT, MAX_SELF_FUSE_PLAYERS,
};

/// Tuning knobs for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often each wallet's autofuse loop looks for work.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct Ctx {
    backend: Arc<dyn WalletBackend>,
    engine: Arc<dyn FusionEngine>,
    credentials: CredentialCache,
    registry: WalletRegistry,
    notifier: EventNotifier,
    shutdown: Shutdown,
    config: ControllerConfig,
    /// Last reported server status, `(ok, (summary, detail))`.
    server_status: Mutex<(bool, (String, String))>,
}

impl Ctx {
    fn persist(&self, wallet: &WalletId, key: &str, value: serde_json::Value) {
        self.backend.setting_put(wallet, key, Some(value));
    }

    /// Runtime disable: clear the flag, retire the loop, return still-live
    /// handles untouched. Optionally records the disable in the wallet bag
    /// (skipped at shutdown so autofuse resumes next session).
    fn disable(&self, wallet: &WalletId, cell: &SlotCell, persist_flag: bool) -> Vec<Arc<FusionHandle>> {
        let live = {
            let mut slot = cell.lock();
            slot.settings.enabled = false;
            slot.autofuse_task.take();
            slot.live_fusions()
        };
        cell.wake.notify_one();
        if persist_flag {
            self.persist(wallet, KEY_AUTOFUSE, json!(false));
        }
        self.notifier.publish(FusionEvent::AutofuseChanged {
            wallet: wallet.clone(),
            enabled: false,
        });
        live
    }
}

/// Owns the per-wallet autofuse lifecycle end to end. Cheap to clone.
#[derive(Clone)]
pub struct FusionController {
    ctx: Arc<Ctx>,
}

impl FusionController {
    pub fn new(backend: Arc<dyn WalletBackend>, engine: Arc<dyn FusionEngine>) -> Self {
        Self::with_config(backend, engine, ControllerConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn WalletBackend>,
        engine: Arc<dyn FusionEngine>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(Ctx {
                backend,
                engine,
                credentials: CredentialCache::new(),
                registry: WalletRegistry::new(),
                notifier: EventNotifier::new(),
                shutdown: Shutdown::new(),
                config,
                server_status: Mutex::new((true, ("Ok".to_string(), String::new()))),
            }),
        }
    }

    // ---- wallet registration --------------------------------------------

    /// Register a wallet, loading its persisted fusion settings. A
    /// password the caller already holds may be seeded into the cache.
    /// Returns true when storage says autofuse was on last session — the
    /// caller decides whether to prompt and re-enable.
    pub fn add_wallet(&self, wallet: &WalletId, cached_password: Option<&str>) -> bool {
        let stored = FusionSettings::load(self.ctx.backend.as_ref(), wallet);
        let wants_autofuse = stored.enabled;
        self.ctx.registry.insert(
            wallet.clone(),
            FusionSettings {
                enabled: false,
                ..stored
            },
        );
        if let Some(password) = cached_password {
            self.ctx.credentials.cache(wallet, password);
        }
        debug!(%wallet, wants_autofuse, "wallet registered");
        wants_autofuse
    }

    /// Unregister a wallet. Retires its autofuse loop and evicts its
    /// cached password; still-live fusions are returned, not stopped —
    /// the caller chooses whether to stop and join them.
    pub fn remove_wallet(&self, wallet: &WalletId) -> Vec<Arc<FusionHandle>> {
        let Some(cell) = self.ctx.registry.remove(wallet) else {
            return Vec::new();
        };
        let live = {
            let mut slot = cell.lock();
            slot.settings.enabled = false;
            slot.autofuse_task.take();
            slot.live_fusions()
        };
        cell.wake.notify_one();
        self.ctx.credentials.evict(wallet);
        debug!(%wallet, live = live.len(), "wallet removed");
        live
    }

    pub fn wallets(&self) -> Vec<WalletId> {
        self.ctx.registry.wallets()
    }

    // ---- autofuse -------------------------------------------------------

    /// Turn on background fusing. The password must satisfy the wallet's
    /// credential check (`None` for unprotected wallets); it is cached
    /// for the background rounds. Idempotent when already enabled.
    pub async fn enable_autofuse(&self, wallet: &WalletId, password: Option<&str>) -> FusionResult<()> {
        let cell = self.slot(wallet)?;
        self.check_credential(wallet, password).await?;
        if let Some(password) = password {
            self.ctx.credentials.cache(wallet, password);
        }
        {
            let mut slot = cell.lock();
            slot.settings.enabled = true;
            slot.loop_token += 1;
            let task = tokio::spawn(autofuse_loop(
                self.ctx.clone(),
                wallet.clone(),
                cell.clone(),
                slot.loop_token,
            ));
            slot.autofuse_task = Some(task);
        }
        self.ctx.persist(wallet, KEY_AUTOFUSE, json!(true));
        info!(%wallet, "autofuse enabled");
        self.ctx.notifier.publish(FusionEvent::AutofuseChanged {
            wallet: wallet.clone(),
            enabled: true,
        });
        Ok(())
    }

    /// Turn off background fusing. Running and queued rounds are left
    /// alone; they are returned so the caller can offer to stop them.
    pub fn disable_autofuse(&self, wallet: &WalletId) -> FusionResult<Vec<Arc<FusionHandle>>> {
        let cell = self.slot(wallet)?;
        let live = self.ctx.disable(wallet, &cell, true);
        info!(%wallet, live = live.len(), "autofuse disabled");
        Ok(live)
    }

    pub fn is_autofusing(&self, wallet: &WalletId) -> bool {
        self.ctx
            .registry
            .get(wallet)
            .map(|cell| cell.lock().settings.enabled)
            .unwrap_or(false)
    }

    /// Convenience for UI toggles: disable when on, enable when off.
    /// Returns the new state.
    pub async fn toggle_autofuse(&self, wallet: &WalletId, password: Option<&str>) -> FusionResult<bool> {
        if self.is_autofusing(wallet) {
            self.disable_autofuse(wallet)?;
            Ok(false)
        } else {
            self.enable_autofuse(wallet, password).await?;
            Ok(true)
        }
    }

    /// React to an external password rotation. Re-arms the credential
    /// when the new password checks out; otherwise autofuse is forcibly
    /// disabled rather than left holding a stale password.
    pub async fn on_password_changed(&self, wallet: &WalletId, new_password: Option<&str>) {
        if !self.is_autofusing(wallet) {
            return;
        }
        match self.enable_autofuse(wallet, new_password).await {
            Ok(()) => info!(%wallet, "autofuse password updated"),
            Err(e) => {
                warn!(%wallet, error = %e, "new password failed its check, disabling autofuse");
                let _ = self.disable_autofuse(wallet);
            }
        }
    }

    /// `(has_password, cached_password)` for prompting decisions:
    /// `(false, None)` means nothing to ask, `(true, None)` means prompt
    /// the user.
    pub async fn cached_password(&self, wallet: &WalletId) -> (bool, Option<String>) {
        self.ctx
            .credentials
            .get(self.ctx.backend.as_ref(), wallet)
            .await
    }

    // ---- manual fusions -------------------------------------------------

    /// Queue one fusion round over the given coins. Fails fast when the
    /// password is wrong, the coin set is empty, or the wallet already
    /// has `queued_limit` live rounds.
    pub async fn start_fusion(
        &self,
        wallet: &WalletId,
        password: Option<&str>,
        coins: Vec<Coin>,
    ) -> FusionResult<Arc<FusionHandle>> {
        let cell = self.slot(wallet)?;
        self.check_credential(wallet, password).await?;
        if coins.is_empty() {
            return Err(FusionError::IneligibleCoins);
        }
        let handle = {
            let mut slot = cell.lock();
            let limit = slot.settings.queued_limit;
            if slot.live_count() as u32 >= limit {
                return Err(FusionError::QueueFull { limit });
            }
            let handle = FusionHandle::new(wallet.clone(), slot.settings.self_fuse_players);
            slot.fusions.push(handle.clone());
            handle
        };
        debug!(%wallet, fusion = handle.id(), coins = coins.len(), "fusion queued");
        spawn_round(
            handle.clone(),
            self.ctx.engine.clone(),
            password.map(str::to_owned),
            coins,
        );
        Ok(handle)
    }

    /// Request a cooperative stop; termination is asynchronous and shows
    /// up on the handle's status.
    pub fn stop(&self, handle: &FusionHandle, reason: &str) {
        handle.stop(reason);
    }

    // ---- settings -------------------------------------------------------

    /// Read-only settings snapshot.
    pub fn settings(&self, wallet: &WalletId) -> FusionResult<FusionSettings> {
        Ok(self.slot(wallet)?.lock().settings.clone())
    }

    /// Change the queued-round bound. Lowering it cancels just enough
    /// waiting rounds to fit, newest first; running rounds are never
    /// touched.
    pub fn set_queued_limit(&self, wallet: &WalletId, limit: u32) -> FusionResult<()> {
        let limit = limit.clamp(1, MAX_QUEUED_LIMIT);
        let cell = self.slot(wallet)?;
        let excess: Vec<Arc<FusionHandle>> = {
            let mut slot = cell.lock();
            slot.settings.queued_limit = limit;
            let overflow = slot.live_count().saturating_sub(limit as usize);
            slot.waiting_fusions().into_iter().rev().take(overflow).collect()
        };
        for handle in &excess {
            handle.stop("queued-fusion limit lowered");
        }
        self.ctx.persist(wallet, KEY_QUEUED_LIMIT, json!(limit));
        cell.wake.notify_one();
        Ok(())
    }

    /// Set how many players this wallet may enter a round as (1 or 2).
    /// A change cancels waiting rounds: their round tags would no longer
    /// overlap with newly queued ones, and the wallet would end up
    /// self-fusing far more than asked. Running rounds finish.
    pub fn set_self_fuse_players(&self, wallet: &WalletId, players: u32) -> FusionResult<()> {
        let players = players.clamp(1, MAX_SELF_FUSE_PLAYERS);
        let cell = self.slot(wallet)?;
        let stale: Vec<Arc<FusionHandle>> = {
            let mut slot = cell.lock();
            if slot.settings.self_fuse_players == players {
                return Ok(());
            }
            slot.settings.self_fuse_players = players;
            slot.waiting_fusions()
        };
        for handle in &stale {
            handle.stop("self-fuse player count changed");
        }
        self.ctx.persist(wallet, KEY_SELF_FUSE, json!(players));
        cell.wake.notify_one();
        Ok(())
    }

    pub fn set_confirmed_only(&self, wallet: &WalletId, confirmed_only: bool) -> FusionResult<()> {
        let cell = self.slot(wallet)?;
        cell.lock().settings.confirmed_only = confirmed_only;
        self.ctx.persist(wallet, KEY_CONFIRMED_ONLY, json!(confirmed_only));
        cell.wake.notify_one();
        Ok(())
    }

    pub fn set_selector(&self, wallet: &WalletId, selector: CoinSelector) -> FusionResult<()> {
        let cell = self.slot(wallet)?;
        cell.lock().settings.selector = selector;
        let value = serde_json::to_value(selector).unwrap_or(serde_json::Value::Null);
        self.ctx.persist(wallet, KEY_SELECTOR, value);
        cell.wake.notify_one();
        Ok(())
    }

    // ---- queries --------------------------------------------------------

    /// Every known fusion handle, most recently started first.
    pub fn fusions(&self) -> Vec<Arc<FusionHandle>> {
        self.ctx.registry.all_fusions()
    }

    /// Handles for one wallet, most recently started first.
    pub fn wallet_fusions(&self, wallet: &WalletId) -> Vec<Arc<FusionHandle>> {
        let Some(cell) = self.ctx.registry.get(wallet) else {
            return Vec::new();
        };
        let mut fusions = cell.lock().fusions.clone();
        fusions.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then(b.id().cmp(&a.id()))
        });
        fusions
    }

    /// Drop terminal handles from history, across all wallets.
    pub fn clear_finished(&self) {
        for wallet in self.ctx.registry.wallets() {
            if let Some(cell) = self.ctx.registry.get(&wallet) {
                cell.lock().prune_finished();
            }
        }
    }

    /// Current coin-eligibility snapshot from the wallet backend, as the
    /// settings surface displays it.
    pub async fn eligible_coins(&self, wallet: &WalletId) -> FusionResult<CoinSnapshot> {
        self.ctx
            .backend
            .eligible_coins(wallet)
            .await
            .map_err(|e| FusionError::External(e.to_string()))
    }

    // ---- events / server status -----------------------------------------

    pub fn events(&self) -> &EventNotifier {
        &self.ctx.notifier
    }

    /// Called by the engine integration whenever it learns something
    /// about server reachability. Duplicate reports are swallowed;
    /// distinct ones fan out to subscribers.
    pub fn note_server_status(
        &self,
        ok: bool,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let status = (ok, (summary.into(), detail.into()));
        {
            let mut last = self
                .ctx
                .server_status
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last == status {
                return;
            }
            *last = status.clone();
        }
        let (ok, (summary, detail)) = status;
        self.ctx
            .notifier
            .publish(FusionEvent::ServerStatus { ok, summary, detail });
    }

    /// `(summary, detail)` of the current server error, `None` when the
    /// server is fine.
    pub fn server_error(&self) -> Option<(String, String)> {
        let last = self
            .ctx
            .server_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.0 {
            None
        } else {
            Some(last.1.clone())
        }
    }

    // ---- shutdown -------------------------------------------------------

    /// Stop every live fusion across the given wallets and wait for each
    /// to reach a terminal state. Used once, at application exit.
    ///
    /// Deliberately no timeout on the join: a round abandoned mid-
    /// broadcast risks fee and double-spend trouble, so this waits as
    /// long as the engine needs. Call it off any latency-sensitive path
    /// and keep the user informed while it runs.
    pub async fn shutdown_all(&self, wallets: &[WalletId], reason: &str) {
        self.ctx.shutdown.trigger();
        let mut targets = Vec::new();
        for wallet in wallets {
            if let Some(cell) = self.ctx.registry.get(wallet) {
                let live = {
                    let mut slot = cell.lock();
                    slot.settings.enabled = false;
                    slot.autofuse_task.take();
                    slot.live_fusions()
                };
                cell.wake.notify_one();
                targets.extend(live);
            }
        }
        for handle in &targets {
            handle.stop(reason);
        }
        info!(count = targets.len(), "waiting for fusions to wind down");
        for handle in &targets {
            handle.join().await;
        }
        info!("all fusions terminal");
    }

    // ---- internals ------------------------------------------------------

    fn slot(&self, wallet: &WalletId) -> FusionResult<Arc<SlotCell>> {
        self.ctx
            .registry
            .get(wallet)
            .ok_or_else(|| FusionError::UnknownWallet(wallet.clone()))
    }

    async fn check_credential(&self, wallet: &WalletId, password: Option<&str>) -> FusionResult<()> {
        if !self.ctx.backend.has_password(wallet) {
            return Ok(());
        }
        match password {
            Some(password) if self.ctx.backend.check_password(wallet, password).await => Ok(()),
            _ => Err(FusionError::InvalidCredential(wallet.clone())),
        }
    }
}

/// Background per-wallet loop: tops the queue up to `queued_limit` while
/// enabled, then gets out of the way. Woken early by settings changes and
/// retired by disable, wallet removal, shutdown, or a newer loop taking
/// over the slot token.
async fn autofuse_loop(ctx: Arc<Ctx>, wallet: WalletId, cell: Arc<SlotCell>, token: u64) {
    debug!(%wallet, token, "autofuse loop started");
    let mut shutdown = ctx.shutdown.subscribe();
    loop {
        let (active, limit, live) = {
            let slot = cell.lock();
            (
                slot.settings.enabled && slot.loop_token == token,
                slot.settings.queued_limit,
                slot.live_count(),
            )
        };
        if !active || ctx.shutdown.is_triggered() {
            break;
        }
        // re-validate the cached credential every pass, even with a full
        // queue: autofuse must not sit enabled holding a dead password
        let (has_password, password) = ctx.credentials.get(ctx.backend.as_ref(), &wallet).await;
        if has_password && password.is_none() {
            warn!(%wallet, "cached password no longer valid, disabling autofuse");
            ctx.disable(&wallet, &cell, true);
            break;
        }
        if (live as u32) < limit {
            try_start_auto_round(&ctx, &wallet, &cell, token, password).await;
        }
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = cell.wake.notified() => {}
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
    debug!(%wallet, token, "autofuse loop stopped");
}

/// One autofuse pass. Backend hiccups are logged and retried next pass.
async fn try_start_auto_round(
    ctx: &Arc<Ctx>,
    wallet: &WalletId,
    cell: &Arc<SlotCell>,
    token: u64,
    password: Option<String>,
) {
    let (confirmed_only, selector) = {
        let slot = cell.lock();
        (slot.settings.confirmed_only, slot.settings.selector)
    };
    let snapshot = match ctx.backend.eligible_coins(wallet).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!(%wallet, error = %e, "coin query failed, retrying next pass");
            return;
        }
    };
    if snapshot.eligible.is_empty() {
        return;
    }
    if confirmed_only && snapshot.has_unconfirmed {
        return;
    }
    let coins = pick_coins(&snapshot, selector);
    if coins.is_empty() {
        return;
    }
    let handle = {
        let mut slot = cell.lock();
        // settings may have moved while we were querying coins
        if !slot.settings.enabled
            || slot.loop_token != token
            || slot.live_count() as u32 >= slot.settings.queued_limit
        {
            return;
        }
        let handle = FusionHandle::new(wallet.clone(), slot.settings.self_fuse_players);
        slot.fusions.push(handle.clone());
        handle
    };
    debug!(%wallet, fusion = handle.id(), coins = coins.len(), "autofuse round queued");
    spawn_round(handle, ctx.engine.clone(), password, coins);
}
