//! Background sweep loop: redelivery, slot eviction, gauge refresh.

use crate::backend::BusBackend;
use crate::cancel::CancelSignal;
use crate::metrics::BusMetrics;
use crate::waiter::WaiterRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Periodic maintenance task for a bus.
///
/// Each pass requeues at-least-once commands whose visibility timeout
/// lapsed, evicts rendezvous slots past their TTL, and refreshes the depth
/// gauges. Built via [`CommandBus::sweeper`](crate::CommandBus::sweeper)
/// and spawned by the embedding application.
#[derive(Clone)]
pub struct ExpirySweeper {
    backend: Arc<dyn BusBackend>,
    waiters: Arc<WaiterRegistry>,
    metrics: Arc<BusMetrics>,
    shutdown: CancelSignal,
    interval: Duration,
    slot_ttl: Duration,
    running: Arc<AtomicBool>,
}

impl ExpirySweeper {
    /// Create a sweeper over the given bus internals.
    pub fn new(
        backend: Arc<dyn BusBackend>,
        waiters: Arc<WaiterRegistry>,
        metrics: Arc<BusMetrics>,
        shutdown: CancelSignal,
        interval: Duration,
        slot_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            waiters,
            metrics,
            shutdown,
            interval,
            slot_ttl,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the pass interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether the sweep loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request the loop to stop at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run sweep passes until [`stop`](ExpirySweeper::stop) or bus shutdown.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Expiry sweeper started"
        );

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.sweep_once().await;
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Expiry sweeper stopped");
    }

    /// One maintenance pass.
    pub async fn sweep_once(&self) {
        match self.backend.sweep_expired().await {
            Ok(0) => {}
            Ok(redelivered) => {
                self.metrics.record_redeliveries(redelivered);
                tracing::debug!(redelivered, "Requeued commands past their visibility timeout");
            }
            Err(e) => tracing::warn!(error = %e, "Redelivery sweep failed"),
        }

        let evicted = self.waiters.sweep_stale(Utc::now(), self.slot_ttl);
        if evicted > 0 {
            self.metrics.record_stale_slots(evicted);
        }

        if let Ok(pending) = self.backend.pending_count().await {
            self.metrics.set_queue_depth(pending as i64);
        }
        if let Ok(in_flight) = self.backend.in_flight_count().await {
            self.metrics.set_in_flight(in_flight as i64);
        }
        self.metrics.set_registered_waiters(self.waiters.count() as i64);
    }
}
