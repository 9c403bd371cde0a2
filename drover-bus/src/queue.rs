//! Per-key FIFO command queue with blocking consumption.
//!
//! One `TopicQueue` exists per `(cluster, topic)` routing key. Producers
//! push, agents long-poll via [`TopicQueue::pop_blocking`], and a
//! [`Notify`] wakes parked poppers without polling loops. In at-least-once
//! mode a popped command stays tracked in-flight until settled, and the
//! sweeper requeues entries whose visibility timeout lapsed.

use crate::cancel::CancelSignal;
use chrono::{DateTime, Utc};
use drover_core::config::{DeliveryMode, MemoryBackendConfig};
use drover_core::error::{BackendError, BackendResult};
use drover_core::{Command, CommandId, QueueKey};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why a blocking pop woke up.
#[derive(Debug)]
pub enum PopOutcome {
    /// A command was removed from the queue head.
    Delivered(Command),
    /// The deadline passed with the queue still empty.
    Empty,
    /// The cancellation signal fired first. Any command popped in the same
    /// instant has been pushed back; nothing is lost.
    Cancelled,
}

impl PopOutcome {
    /// Extract the delivered command, if any.
    #[must_use]
    pub fn into_command(self) -> Option<Command> {
        match self {
            Self::Delivered(command) => Some(command),
            Self::Empty | Self::Cancelled => None,
        }
    }
}

struct InFlightEntry {
    command: Command,
    redeliver_at: DateTime<Utc>,
}

/// FIFO queue for one routing key.
pub struct TopicQueue {
    key: QueueKey,
    max_depth: usize,
    delivery: DeliveryMode,
    /// Pending commands, head first.
    inner: Mutex<VecDeque<Command>>,
    /// Delivered but unacked commands (at-least-once mode only).
    in_flight: Mutex<HashMap<CommandId, InFlightEntry>>,
    /// Wakes parked poppers.
    notify: Notify,
    total_pushed: AtomicUsize,
    total_popped: AtomicUsize,
}

impl TopicQueue {
    /// Create a queue for `key` with the backend's bound and delivery mode.
    pub fn new(key: QueueKey, config: &MemoryBackendConfig) -> Self {
        Self {
            key,
            max_depth: config.max_queue_depth,
            delivery: config.delivery,
            inner: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            total_pushed: AtomicUsize::new(0),
            total_popped: AtomicUsize::new(0),
        }
    }

    /// The routing key this queue serves.
    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    /// Current queue depth (pending commands).
    pub fn depth(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Delivered-but-unacked count (always 0 in at-most-once mode).
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Total commands ever pushed.
    pub fn total_pushed(&self) -> usize {
        self.total_pushed.load(Ordering::Relaxed)
    }

    /// Total commands ever delivered.
    pub fn total_popped(&self) -> usize {
        self.total_popped.load(Ordering::Relaxed)
    }

    /// Append a command, applying the depth bound.
    pub fn push(&self, command: Command) -> BackendResult<()> {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.max_depth {
                return Err(BackendError::QueueFull {
                    key: self.key.clone(),
                    current: queue.len(),
                    max: self.max_depth,
                });
            }
            queue.push_back(command);
        }
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Requeue a command at the head.
    ///
    /// Used for cancellation push-back and redelivery; the command was
    /// already admitted once, so the depth bound does not apply.
    pub fn push_front(&self, command: Command) {
        self.inner.lock().push_front(command);
        self.notify.notify_one();
    }

    /// Remove and return the head, parking up to `timeout` if the queue is
    /// empty.
    ///
    /// Wakes on push, on deadline expiry, or on `cancel`; the outcome names
    /// which. A popped command observed after cancellation is pushed back at
    /// the head so it is never silently lost.
    pub async fn pop_blocking(&self, timeout: Duration, cancel: &CancelSignal) -> PopOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return PopOutcome::Cancelled;
            }

            if let Some(command) = self.take_head() {
                if cancel.is_cancelled() {
                    // The caller is already gone; undo the pop.
                    tracing::debug!(
                        command_id = %command.id,
                        key = %self.key,
                        "Pop cancelled, command returned to queue head"
                    );
                    self.push_front(command);
                    return PopOutcome::Cancelled;
                }
                return PopOutcome::Delivered(self.deliver(command));
            }

            if Instant::now() >= deadline {
                return PopOutcome::Empty;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return PopOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return PopOutcome::Empty,
            }
        }
    }

    /// Settle an in-flight command after its ack (at-least-once mode).
    ///
    /// Returns whether an in-flight entry existed.
    pub fn settle(&self, command_id: CommandId) -> bool {
        self.in_flight.lock().remove(&command_id).is_some()
    }

    /// Requeue in-flight commands whose visibility timeout lapsed before
    /// `now`. Returns the number redelivered.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        if !matches!(self.delivery, DeliveryMode::AtLeastOnce { .. }) {
            return 0;
        }

        let mut expired: Vec<InFlightEntry> = {
            let mut in_flight = self.in_flight.lock();
            let ids: Vec<CommandId> = in_flight
                .iter()
                .filter(|(_, entry)| entry.redeliver_at <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| in_flight.remove(&id))
                .collect()
        };

        let count = expired.len();
        // Requeue oldest-deadline first at the very head, preserving age order
        expired.sort_by_key(|entry| entry.redeliver_at);
        for entry in expired.into_iter().rev() {
            tracing::warn!(
                command_id = %entry.command.id,
                key = %self.key,
                attempt = entry.command.attempt,
                "Visibility timeout lapsed, redelivering command"
            );
            self.push_front(entry.command);
        }
        count
    }

    fn take_head(&self) -> Option<Command> {
        self.inner.lock().pop_front()
    }

    fn deliver(&self, mut command: Command) -> Command {
        command.increment_attempt();
        self.total_popped.fetch_add(1, Ordering::Relaxed);

        if let DeliveryMode::AtLeastOnce {
            visibility_timeout_ms,
        } = self.delivery
        {
            let redeliver_at =
                Utc::now() + chrono::Duration::milliseconds(visibility_timeout_ms as i64);
            self.in_flight.lock().insert(
                command.id,
                InFlightEntry {
                    command: command.clone(),
                    redeliver_at,
                },
            );
        }

        tracing::debug!(
            command_id = %command.id,
            key = %self.key,
            attempt = command.attempt,
            "Dequeued command"
        );
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::Topic;

    fn test_queue(config: MemoryBackendConfig) -> TopicQueue {
        TopicQueue::new(QueueKey::new("c1", Topic::Ops), &config)
    }

    fn command(action: &str) -> Command {
        Command::new("c1", Topic::Ops, action)
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = test_queue(MemoryBackendConfig::default());
        let cancel = CancelSignal::new();

        queue.push(command("first")).unwrap();
        queue.push(command("second")).unwrap();
        queue.push(command("third")).unwrap();

        for expected in ["first", "second", "third"] {
            let delivered = queue
                .pop_blocking(Duration::ZERO, &cancel)
                .await
                .into_command()
                .unwrap();
            assert_eq!(delivered.action, expected);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn zero_timeout_on_empty_queue_returns_empty() {
        let queue = test_queue(MemoryBackendConfig::default());
        let outcome = queue.pop_blocking(Duration::ZERO, &CancelSignal::new()).await;
        assert!(matches!(outcome, PopOutcome::Empty));
    }

    #[tokio::test]
    async fn queue_full() {
        let queue = test_queue(MemoryBackendConfig::new().max_queue_depth(2));

        queue.push(command("a")).unwrap();
        queue.push(command("b")).unwrap();
        let result = queue.push(command("c"));
        assert!(matches!(result, Err(BackendError::QueueFull { .. })));
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn push_front_is_not_bounded() {
        let queue = test_queue(MemoryBackendConfig::new().max_queue_depth(1));
        queue.push(command("queued")).unwrap();

        queue.push_front(command("requeued"));
        assert_eq!(queue.depth(), 2);

        let head = queue
            .pop_blocking(Duration::ZERO, &CancelSignal::new())
            .await
            .into_command()
            .unwrap();
        assert_eq!(head.action, "requeued");
    }

    #[tokio::test]
    async fn parked_popper_woken_by_push() {
        let queue = std::sync::Arc::new(test_queue(MemoryBackendConfig::default()));
        let cancel = CancelSignal::new();

        let popper = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop_blocking(Duration::from_secs(5), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(command("wake")).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("popper should wake promptly after push")
            .unwrap();
        assert_eq!(outcome.into_command().unwrap().action, "wake");
    }

    #[tokio::test]
    async fn deadline_expiry_reports_empty() {
        let queue = test_queue(MemoryBackendConfig::default());
        let started = Instant::now();
        let outcome = queue
            .pop_blocking(Duration::from_millis(50), &CancelSignal::new())
            .await;
        assert!(matches!(outcome, PopOutcome::Empty));
        assert!(
            started.elapsed() >= Duration::from_millis(50),
            "pop returned before the deadline"
        );
    }

    #[tokio::test]
    async fn pre_cancelled_signal_leaves_queue_untouched() {
        let queue = test_queue(MemoryBackendConfig::default());
        queue.push(command("survivor")).unwrap();

        let cancel = CancelSignal::new();
        cancel.cancel();

        let outcome = queue.pop_blocking(Duration::from_secs(1), &cancel).await;
        assert!(matches!(outcome, PopOutcome::Cancelled));
        assert_eq!(queue.depth(), 1, "cancelled pop must not consume the command");
    }

    #[tokio::test]
    async fn cancel_wakes_parked_popper() {
        let queue = std::sync::Arc::new(test_queue(MemoryBackendConfig::default()));
        let cancel = CancelSignal::new();

        let popper = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop_blocking(Duration::from_secs(5), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = Instant::now();
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("cancel should wake the popper promptly")
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn at_most_once_tracks_nothing() {
        let queue = test_queue(MemoryBackendConfig::default());
        queue.push(command("fire_and_forget")).unwrap();

        let delivered = queue
            .pop_blocking(Duration::ZERO, &CancelSignal::new())
            .await
            .into_command()
            .unwrap();
        assert_eq!(delivered.attempt, 1);
        assert_eq!(queue.in_flight_count(), 0);
        assert!(!queue.settle(delivered.id));
        assert_eq!(queue.sweep_expired(Utc::now()), 0);
    }

    #[tokio::test]
    async fn at_least_once_settle_clears_in_flight() {
        let queue = test_queue(MemoryBackendConfig::new().at_least_once(60_000));
        queue.push(command("tracked")).unwrap();

        let delivered = queue
            .pop_blocking(Duration::ZERO, &CancelSignal::new())
            .await
            .into_command()
            .unwrap();
        assert_eq!(queue.in_flight_count(), 1);

        assert!(queue.settle(delivered.id));
        assert_eq!(queue.in_flight_count(), 0);
        assert_eq!(queue.sweep_expired(Utc::now()), 0);
    }

    #[tokio::test]
    async fn sweep_redelivers_lapsed_commands() {
        let queue = test_queue(MemoryBackendConfig::new().at_least_once(10));
        queue.push(command("flaky")).unwrap();

        let first = queue
            .pop_blocking(Duration::ZERO, &CancelSignal::new())
            .await
            .into_command()
            .unwrap();
        assert_eq!(first.attempt, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.sweep_expired(Utc::now()), 1);
        assert_eq!(queue.in_flight_count(), 0);

        let second = queue
            .pop_blocking(Duration::ZERO, &CancelSignal::new())
            .await
            .into_command()
            .unwrap();
        assert_eq!(second.id, first.id, "redelivery must reuse the same command");
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn counters_track_throughput() {
        let queue = test_queue(MemoryBackendConfig::default());
        queue.push(command("a")).unwrap();
        queue.push(command("b")).unwrap();
        let _ = queue.pop_blocking(Duration::ZERO, &CancelSignal::new()).await;

        assert_eq!(queue.total_pushed(), 2);
        assert_eq!(queue.total_popped(), 1);
        assert_eq!(queue.depth(), 1);
    }
}
