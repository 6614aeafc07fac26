//! Per-wallet autofuse state.
//!
//! Each registered wallet gets a slot holding its settings, its ordered
//! fusion handles (queue order, oldest first; terminal handles kept for
//! history until cleared), and its background loop task. A slot is
//! guarded by its own lock so wallets never contend with each other, and
//! slot locks are only ever held for in-memory updates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backend::WalletId;
use crate::round::FusionHandle;
use crate::settings::FusionSettings;

pub(crate) struct WalletSlot {
    pub settings: FusionSettings,
    /// Queue order, oldest first.
    pub fusions: Vec<Arc<FusionHandle>>,
    /// Background autofuse loop, present while enabled.
    pub autofuse_task: Option<JoinHandle<()>>,
    /// Bumped on every enable. A loop retires when the slot's token moves
    /// past its own, so a disable/enable race can never leave two loops
    /// serving one wallet, or none.
    pub loop_token: u64,
}

impl WalletSlot {
    fn new(settings: FusionSettings) -> Self {
        Self {
            settings,
            fusions: Vec::new(),
            autofuse_task: None,
            loop_token: 0,
        }
    }

    /// Handles that have not reached a terminal state, queue order.
    pub fn live_fusions(&self) -> Vec<Arc<FusionHandle>> {
        self.fusions
            .iter()
            .filter(|f| !f.is_terminal())
            .cloned()
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.fusions.iter().filter(|f| !f.is_terminal()).count()
    }

    /// Still-waiting handles, queue order.
    pub fn waiting_fusions(&self) -> Vec<Arc<FusionHandle>> {
        self.fusions
            .iter()
            .filter(|f| f.is_waiting())
            .cloned()
            .collect()
    }

    /// Drop terminal handles from history.
    pub fn prune_finished(&mut self) {
        self.fusions.retain(|f| !f.is_terminal());
    }
}

pub(crate) struct SlotCell {
    state: Mutex<WalletSlot>,
    /// Wakes the wallet's autofuse loop after a settings change or
    /// disable, without needing the state lock.
    pub wake: Notify,
}

impl SlotCell {
    pub fn lock(&self) -> MutexGuard<'_, WalletSlot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
pub(crate) struct WalletRegistry {
    slots: RwLock<HashMap<WalletId, Arc<SlotCell>>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wallet, keeping any existing slot (and its live state)
    /// on re-registration.
    pub fn insert(&self, wallet: WalletId, settings: FusionSettings) -> Arc<SlotCell> {
        let mut slots = self.write();
        slots
            .entry(wallet)
            .or_insert_with(|| {
                Arc::new(SlotCell {
                    state: Mutex::new(WalletSlot::new(settings)),
                    wake: Notify::new(),
                })
            })
            .clone()
    }

    pub fn remove(&self, wallet: &WalletId) -> Option<Arc<SlotCell>> {
        self.write().remove(wallet)
    }

    pub fn get(&self, wallet: &WalletId) -> Option<Arc<SlotCell>> {
        self.read().get(wallet).cloned()
    }

    pub fn wallets(&self) -> Vec<WalletId> {
        self.read().keys().cloned().collect()
    }

    /// Every known handle across wallets, most recently started first.
    pub fn all_fusions(&self) -> Vec<Arc<FusionHandle>> {
        let cells: Vec<Arc<SlotCell>> = self.read().values().cloned().collect();
        let mut fusions: Vec<Arc<FusionHandle>> = cells
            .iter()
            .flat_map(|cell| cell.lock().fusions.clone())
            .collect();
        fusions.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then(b.id().cmp(&a.id()))
        });
        fusions
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<WalletId, Arc<SlotCell>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<WalletId, Arc<SlotCell>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
