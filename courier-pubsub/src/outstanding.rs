use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Counts deliveries whose handler is currently executing.
///
/// Once [`arm_for_shutdown`](Self::arm_for_shutdown) has been called, the next time the
/// count reaches zero (or right away if it already is zero) the completion signal fires.
/// The signal fires at most once.
#[derive(Debug, Default)]
pub struct OutstandingTracker {
    active: AtomicI64,
    armed: Mutex<bool>,
    done: CancellationToken,
}

impl OutstandingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// # Panics
    ///
    /// Panics if called more often than [`increment`](Self::increment).
    pub fn decrement(&self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining < 0 {
            panic!("outstanding delivery tracker: active deliveries < 0");
        }

        if remaining == 0 {
            // A delivery may have started between the decrement and taking the lock.
            let armed = self.armed.lock();
            if *armed && self.active.load(Ordering::SeqCst) == 0 {
                self.done.cancel();
            }
        }
    }

    pub fn arm_for_shutdown(&self) {
        let mut armed = self.armed.lock();
        *armed = true;

        if self.active.load(Ordering::SeqCst) == 0 {
            self.done.cancel();
        }
    }

    /// Resolves once the tracker was armed and every delivery has finished.
    pub async fn done(&self) {
        self.done.cancelled().await
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn is_armed(&self) -> bool {
        *self.armed.lock()
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Counts one delivery until the returned guard is dropped.
    pub fn begin_delivery(self: &Arc<Self>) -> DeliveryGuard {
        self.increment();
        DeliveryGuard {
            tracker: Arc::clone(self),
        }
    }
}

/// Decrements its tracker exactly once, when dropped.
#[must_use = "the delivery is only counted while the guard is alive"]
#[derive(Debug)]
pub struct DeliveryGuard {
    tracker: Arc<OutstandingTracker>,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}
