//! Renewal plumbing: the single scheduled timer and refresh deduplication.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

/// Holds at most one scheduled renewal task.
///
/// Arming replaces (and aborts) whatever was scheduled before, so the
/// engine can never accumulate stray timers across re-login or retries.
#[derive(Default)]
pub struct TimerSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` as the scheduled task, aborting any previous one.
    pub fn arm(&self, handle: JoinHandle<()>) {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            debug!("Replacing scheduled renewal timer");
            previous.abort();
        }
        *slot = Some(handle);
    }

    /// Abort the scheduled task, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(handle) = self.lock().take() {
            debug!("Cancelling scheduled renewal timer");
            handle.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

type SharedFlight = Shared<BoxFuture<'static, bool>>;

/// Deduplicates concurrent refresh attempts.
///
/// While a flight is in progress every caller awaits the same outcome;
/// once it settles the next caller starts a fresh one. The work itself
/// runs on its own task: callers only join it, so an aborted caller
/// never suspends the flight, and the slot always clears when the work
/// settles even if no caller is left to observe it.
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<Option<SharedFlight>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-progress flight, or start one from `make` if none exists.
    pub async fn run<F, Fut>(self: Arc<Self>, make: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let shared = {
            let mut slot = self.lock();
            if let Some(existing) = slot.as_ref() {
                debug!("Joining in-flight refresh");
                existing.clone()
            } else {
                let flight = Arc::clone(&self);
                let work = make();
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    *flight.lock() = None;
                    result
                });
                // An aborted or panicked flight counts as a failed refresh.
                let wrapped: BoxFuture<'static, bool> =
                    Box::pin(async move { handle.await.unwrap_or(false) });
                let shared = wrapped.shared();
                *slot = Some(shared.clone());
                shared
            }
        };
        shared.await
    }

    fn lock(&self) -> MutexGuard<'_, Option<SharedFlight>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }
}
