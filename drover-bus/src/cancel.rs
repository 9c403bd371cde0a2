//! Cancellation signal shared by blocking bus calls.
//!
//! Deadline expiry and caller cancellation are the two stop-waiting events a
//! blocking call can observe; this type carries the second one. The transport
//! layer holds a clone per request and fires it when the caller disconnects,
//! and the bus fires its own clone on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A clonable, one-way cancellation signal.
///
/// Once cancelled, the signal stays cancelled; every clone observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Create a new, un-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, waking every parked waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires.
    ///
    /// Returns immediately if it already has.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before the final flag check so a cancel
            // landing between the check and the await is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_uncancelled() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_fired() {
        let signal = CancelSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());

        // Must not hang
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already-cancelled signal should resolve immediately");
    }

    #[tokio::test]
    async fn cancel_wakes_parked_waiter() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_wakes_all_clones() {
        let signal = CancelSignal::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let waiter = signal.clone();
            handles.push(tokio::spawn(async move {
                waiter.cancelled().await;
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.cancel();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("every clone should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn uncancelled_signal_keeps_waiting() {
        let signal = CancelSignal::new();
        let result =
            tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(result.is_err(), "cancelled() must park until the signal fires");
    }
}
