use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-shot event: starts unset, transitions to set at most once, and
/// releases every current and future waiter once set.
///
/// Mirrors `asyncio.Event` from the reference implementation, but as a
/// `Notify` guarded by a flag so that a waiter arriving after the event
/// already fired does not block forever on a missed notification.
#[derive(Debug, Default)]
pub struct OneShotEvent {
    set: AtomicBool,
    notify: Notify,
}

impl OneShotEvent {
    pub fn new() -> Self {
        OneShotEvent {
            set: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Sets the event, if not already set, and wakes every waiter.
    /// Idempotent: firing twice is a no-op on the second call.
    pub fn fire(&self) {
        if self.set.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();
    }

    /// Waits until the event is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}
