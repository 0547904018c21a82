//! Minimal cooperative cancellation token, independent of any particular
//! caller transport (CLI ctrl-c, request drop, ...). Cloning shares the
//! underlying signal, so every holder sees the same cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken {
    notify: Arc<Notify>,
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. If already canceled,
    /// resolves immediately on the next poll.
    pub async fn canceled(&self) {
        // Register interest before the flag check so a `cancel()` landing
        // between the two can't be missed (`notify_waiters` only wakes
        // futures that already exist, it stores no permit for latecomers).
        let notified = self.notify.notified();
        if self.is_canceled() {
            return;
        }
        notified.await;
    }
}
