//! State-change broadcast to interested observers.
//!
//! A plain callback registry instead of any toolkit's signal/slot
//! machinery: subscribers register boxed callbacks and get every distinct
//! event in publish order. Publishing the same event twice in a row
//! delivers it once. Delivery is isolated per subscriber: one panicking
//! callback is logged and the rest still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::WalletId;

/// Events published by the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusionEvent {
    /// Fusion server reachability changed.
    ServerStatus {
        ok: bool,
        summary: String,
        detail: String,
    },
    /// Autofuse was switched on or off for a wallet.
    AutofuseChanged { wallet: WalletId, enabled: bool },
}

type Callback = Arc<dyn Fn(&FusionEvent) + Send + Sync>;

#[derive(Default)]
struct NotifierState {
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
    last: Option<FusionEvent>,
}

#[derive(Default)]
pub struct EventNotifier {
    state: Mutex<NotifierState>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; keep the returned id to unsubscribe.
    pub fn subscribe(&self, callback: impl Fn(&FusionEvent) + Send + Sync + 'static) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    /// Deliver to every subscriber, unless identical to the previous
    /// publish. Callbacks run without the registry lock held, so they may
    /// re-enter subscribe/unsubscribe.
    pub fn publish(&self, event: FusionEvent) {
        let targets: Vec<Callback> = {
            let mut state = self.lock();
            if state.last.as_ref() == Some(&event) {
                return;
            }
            state.last = Some(event.clone());
            state.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::warn!(?event, "event subscriber panicked, continuing delivery");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
