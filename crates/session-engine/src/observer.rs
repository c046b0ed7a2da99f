//! Session state observers.
//!
//! Observers are tracked through numeric registration ids rather than
//! compared by function identity, so two subscriptions of the same closure
//! are distinct and removal is exact.

use crate::state::SessionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

type ObserverFn = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// Registry of session state observers.
///
/// Notification is synchronous and runs in subscription order against a
/// snapshot of the observer list, so an observer that unsubscribes (or
/// subscribes) during a notification does not affect the pass in flight.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<(u64, ObserverFn)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and return its registration id.
    pub fn add<F>(&self, observer: F) -> u64
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut observers = self.lock_observers();
        observers.push((id, Arc::new(observer)));
        debug!(observer_id = id, count = observers.len(), "Observer subscribed");
        id
    }

    /// Remove the observer registered under `id`. Idempotent.
    pub fn remove(&self, id: u64) {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        if observers.len() < before {
            debug!(observer_id = id, "Observer unsubscribed");
        }
    }

    /// Deliver `state` to every observer registered at the start of the call.
    pub fn notify(&self, state: &SessionState) {
        let snapshot: Vec<ObserverFn> = self
            .lock_observers()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer(state);
        }
    }

    /// Number of currently registered observers.
    pub fn len(&self) -> usize {
        self.lock_observers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, ObserverFn)>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle identifying one subscription.
///
/// Dropping the handle does NOT unsubscribe; call
/// [`Subscription::unsubscribe`] explicitly.
pub struct Subscription {
    registry: Arc<ObserverRegistry>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(registry: Arc<ObserverRegistry>, id: u64) -> Self {
        Self { registry, id }
    }

    /// Remove this observer. Idempotent.
    pub fn unsubscribe(&self) {
        self.registry.remove(self.id);
    }
}
