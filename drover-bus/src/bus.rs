//! The command bus: enqueue, agent long-poll, ack, status, result wait.
//!
//! The bus composes a [`BusBackend`] (queues + status table), the
//! [`WaiterRegistry`] (ack-to-caller rendezvous), metrics, and an audit
//! sink. All five operations are safe to call concurrently from any number
//! of tasks.

use crate::audit::{CommandAuditSink, LogAuditSink};
use crate::backend::{BusBackend, CompletionOutcome, MemoryBackend, TimeoutOutcome};
use crate::cancel::CancelSignal;
use crate::metrics::BusMetrics;
use crate::queue::PopOutcome;
use crate::sweeper::ExpirySweeper;
use crate::waiter::{PrepareOutcome, RegisterOutcome, WaiterRegistry};
use chrono::Utc;
use drover_core::config::{BackendConfig, BusConfig};
use drover_core::error::{AckError, BackendError, EnqueueError, WaitError};
use drover_core::{Command, CommandId, CommandResult, CommandState, CommandStatus, QueueKey, Topic};
use std::sync::Arc;
use std::time::Duration;

/// Central dispatch point for cluster commands.
///
/// Producers call [`enqueue_command`](CommandBus::enqueue_command) and
/// usually park on [`wait_command_result`](CommandBus::wait_command_result);
/// per-cluster agents long-poll [`wait_command`](CommandBus::wait_command)
/// and report back through [`ack_command`](CommandBus::ack_command).
pub struct CommandBus {
    backend: Arc<dyn BusBackend>,
    waiters: Arc<WaiterRegistry>,
    metrics: Arc<BusMetrics>,
    audit: Arc<dyn CommandAuditSink>,
    shutdown: CancelSignal,
    config: BusConfig,
}

impl CommandBus {
    /// Create a bus with the backend named in `config`.
    pub fn new(config: BusConfig) -> Self {
        let backend: Arc<dyn BusBackend> = match &config.backend {
            BackendConfig::Memory(memory) => Arc::new(MemoryBackend::new(memory.clone())),
        };
        Self::with_backend(config, backend)
    }

    /// Create a bus on top of an existing backend.
    pub fn with_backend(config: BusConfig, backend: Arc<dyn BusBackend>) -> Self {
        Self {
            waiters: Arc::new(WaiterRegistry::new(config.max_inflight_waiters)),
            metrics: Arc::new(BusMetrics::new()),
            audit: Arc::new(LogAuditSink),
            shutdown: CancelSignal::new(),
            backend,
            config,
        }
    }

    /// Replace the audit sink. Call before sharing the bus.
    pub fn with_audit_sink(mut self, sink: Arc<dyn CommandAuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// The configuration this bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The bus metrics registry.
    pub fn metrics(&self) -> Arc<BusMetrics> {
        self.metrics.clone()
    }

    /// Short name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// The signal fired when [`shutdown`](CommandBus::shutdown) begins.
    pub fn shutdown_signal(&self) -> CancelSignal {
        self.shutdown.clone()
    }

    /// Build the background sweeper for this bus. The caller spawns it:
    ///
    /// ```ignore
    /// let sweeper = bus.sweeper();
    /// tokio::spawn(async move { sweeper.run().await });
    /// ```
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.backend.clone(),
            self.waiters.clone(),
            self.metrics.clone(),
            self.shutdown.clone(),
            self.config.sweep_interval(),
            self.config.waiter_slot_ttl(),
        )
    }

    /// Accept a command for `cluster_id`/`topic`.
    ///
    /// The routing arguments are authoritative; the command is restamped
    /// with them before queueing. On success the command is visible to
    /// agents and its status row reads `Pending`. On any failure nothing is
    /// tracked and nothing is queued.
    ///
    /// # Errors
    ///
    /// - [`EnqueueError::InvalidTopic`] for an unknown topic or empty cluster
    /// - [`EnqueueError::QueueFull`] when the queue or the in-flight
    ///   ceiling pushes back
    pub async fn enqueue_command(
        &self,
        cluster_id: &str,
        topic: &str,
        mut command: Command,
    ) -> Result<CommandId, EnqueueError> {
        if self.shutdown.is_cancelled() {
            return Err(EnqueueError::Backend(BackendError::ShuttingDown));
        }
        let Some(parsed) = Topic::parse(topic) else {
            return Err(EnqueueError::InvalidTopic {
                cluster_id: cluster_id.to_string(),
                topic: topic.to_string(),
            });
        };
        if cluster_id.trim().is_empty() {
            return Err(EnqueueError::InvalidTopic {
                cluster_id: cluster_id.to_string(),
                topic: topic.to_string(),
            });
        }

        command.cluster_id = cluster_id.to_string();
        command.topic = parsed;
        let command_id = command.id;
        let key = command.key();

        let prepared_fresh = match self.waiters.prepare(command_id) {
            PrepareOutcome::Prepared => true,
            PrepareOutcome::Existing => false,
            PrepareOutcome::Full { count, max } => {
                return Err(EnqueueError::QueueFull {
                    key,
                    current: count,
                    max,
                });
            }
        };

        if let Err(e) = self
            .backend
            .insert_status(CommandStatus::pending(&command))
            .await
        {
            if prepared_fresh {
                self.waiters.discard(command_id);
            }
            return Err(e.into());
        }

        if let Err(e) = self.backend.push(command).await {
            // Roll back so a rejected command leaves no trace.
            let _ = self.backend.remove_status(command_id).await;
            if prepared_fresh {
                self.waiters.discard(command_id);
            }
            return Err(e.into());
        }

        self.metrics.record_enqueued(cluster_id, parsed.as_str());
        tracing::debug!(command_id = %command_id, key = %key, "Command enqueued");
        Ok(command_id)
    }

    /// Long-poll for the next command on `cluster_id`/`topic`.
    ///
    /// Blocks up to `timeout`, waking early when a command arrives or when
    /// `cancel` fires. A delivered command is marked `Running`. Polling an
    /// unknown topic is not an error; it returns `None` so a misconfigured
    /// agent degrades to an idle poll loop.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Cancelled`] when `cancel` (or bus shutdown) wins
    pub async fn wait_command(
        &self,
        cluster_id: &str,
        topic: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<Option<Command>, WaitError> {
        let Some(parsed) = Topic::parse(topic) else {
            tracing::warn!(cluster = cluster_id, topic, "Agent polled an unknown topic");
            return Ok(None);
        };
        let key = QueueKey::new(cluster_id, parsed);

        match self
            .backend
            .pop_blocking(key, timeout, cancel.clone())
            .await?
        {
            PopOutcome::Delivered(command) => {
                // The command is already out of the queue; a failed status
                // write must not drop the delivery.
                if let Err(e) = self.backend.mark_running(command.id, Utc::now()).await {
                    tracing::warn!(
                        command_id = %command.id,
                        error = %e,
                        "Failed to mark delivered command running"
                    );
                }
                self.metrics.record_delivered(cluster_id, parsed.as_str());
                tracing::debug!(
                    command_id = %command.id,
                    key = %command.key(),
                    attempt = command.attempt,
                    "Command delivered"
                );
                Ok(Some(command))
            }
            PopOutcome::Empty => Ok(None),
            PopOutcome::Cancelled => Err(WaitError::Cancelled),
        }
    }

    /// Apply an agent's result for a command.
    ///
    /// The first terminal write wins: a result landing on a live command
    /// completes it and releases its waiter; one landing after the command
    /// timed out is recorded against the `Timeout` row; any further ack is
    /// discarded as a duplicate (counted, not an error).
    ///
    /// # Errors
    ///
    /// - [`AckError::UnknownCommand`] when the bus never tracked this id
    pub async fn ack_command(&self, result: CommandResult) -> Result<(), AckError> {
        let command_id = result.command_id;

        match self.backend.complete(result.clone()).await? {
            CompletionOutcome::Completed => {
                self.waiters.fulfill(command_id, result);
                if let Some(status) = self.backend.get_status(command_id).await? {
                    self.settle_delivery(&status).await;
                    let outcome = if status.state == CommandState::Success {
                        "success"
                    } else {
                        "failed"
                    };
                    self.metrics.record_acked(outcome);
                    if let Some(turnaround) = status.turnaround_secs() {
                        self.metrics.observe_turnaround(
                            &status.cluster_id,
                            status.topic.as_str(),
                            turnaround,
                        );
                    }
                    self.audit.on_terminal(&status);
                }
                tracing::debug!(command_id = %command_id, "Command acked");
                Ok(())
            }
            CompletionOutcome::RecordedLate => {
                self.waiters.fulfill(command_id, result);
                if let Some(status) = self.backend.get_status(command_id).await? {
                    self.settle_delivery(&status).await;
                    self.metrics.record_acked("late");
                    self.audit.on_terminal(&status);
                }
                tracing::warn!(command_id = %command_id, "Late ack recorded after timeout");
                Ok(())
            }
            CompletionOutcome::AlreadyTerminal(state) => {
                self.metrics.record_duplicate_ack();
                tracing::warn!(
                    command_id = %command_id,
                    state = %state,
                    "Duplicate ack discarded"
                );
                Ok(())
            }
            CompletionOutcome::Unknown => Err(AckError::UnknownCommand(command_id)),
        }
    }

    /// Read a command's current status.
    ///
    /// Returns `None` for ids the bus never tracked or whose rows were
    /// already cleaned up.
    pub async fn get_command_status(&self, command_id: CommandId) -> Option<CommandStatus> {
        match self.backend.get_status(command_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(command_id = %command_id, error = %e, "Status lookup failed");
                None
            }
        }
    }

    /// Park until `command_id` reaches a terminal state, up to `timeout`.
    ///
    /// Returns the result as soon as an ack lands. If the deadline passes
    /// first, the command is marked `Timeout` and `None` is returned; an
    /// ack racing the deadline is honored exactly once, on whichever side
    /// wins. Bus shutdown releases the waiter with `None`.
    pub async fn wait_command_result(
        &self,
        command_id: CommandId,
        timeout: Duration,
    ) -> Option<CommandResult> {
        if let Some(status) = self.get_command_status(command_id).await {
            if status.is_terminal() {
                return status.result;
            }
        }

        let waiter = match self.waiters.register(command_id) {
            RegisterOutcome::Registered(waiter) => waiter,
            RegisterOutcome::DuplicateWaiter => {
                self.metrics.record_waiter_rejected("duplicate");
                tracing::warn!(
                    command_id = %command_id,
                    "A waiter is already parked on this command"
                );
                return None;
            }
            RegisterOutcome::RegistryFull { count, max } => {
                self.metrics.record_waiter_rejected("registry_full");
                tracing::warn!(command_id = %command_id, count, max, "Waiter registry full");
                return None;
            }
        };

        // An ack may have landed between the fast path and registration.
        if let Some(status) = self.get_command_status(command_id).await {
            if status.is_terminal() {
                self.waiters.discard(command_id);
                return status.result;
            }
        }

        tokio::select! {
            outcome = tokio::time::timeout(timeout, waiter.wait()) => match outcome {
                Ok(Some(result)) => Some(result),
                Ok(None) | Err(_) => self.arbitrate_timeout(command_id).await,
            },
            _ = self.shutdown.cancelled() => {
                self.waiters.discard(command_id);
                None
            }
        }
    }

    /// Pending commands on one routing key.
    pub async fn queue_depth(&self, cluster_id: &str, topic: Topic) -> usize {
        self.backend
            .queue_depth(QueueKey::new(cluster_id, topic))
            .await
            .unwrap_or(0)
    }

    /// Pending commands across all routing keys.
    pub async fn pending_count(&self) -> usize {
        self.backend.pending_count().await.unwrap_or(0)
    }

    /// Delivered-but-unacked commands across all routing keys.
    pub async fn in_flight_count(&self) -> usize {
        self.backend.in_flight_count().await.unwrap_or(0)
    }

    /// Rendezvous slots currently held.
    pub fn waiter_count(&self) -> usize {
        self.waiters.count()
    }

    /// Check bus health (backend reachable, not shutting down).
    pub async fn health_check(&self) -> bool {
        !self.shutdown.is_cancelled() && self.backend.health_check().await.unwrap_or(false)
    }

    /// Stop the bus: wake every parked agent and waiter, refuse new work.
    pub async fn shutdown(&self) {
        tracing::info!("Command bus shutting down");
        self.shutdown.cancel();
        if let Err(e) = self.backend.shutdown().await {
            tracing::warn!(error = %e, "Backend shutdown reported an error");
        }
    }

    /// Resolve a waiter deadline against a possibly-racing ack.
    async fn arbitrate_timeout(&self, command_id: CommandId) -> Option<CommandResult> {
        match self.backend.mark_timeout(command_id, Utc::now()).await {
            Ok(TimeoutOutcome::Marked) => {
                self.metrics.record_timeout();
                if let Some(status) = self.get_command_status(command_id).await {
                    self.audit.on_terminal(&status);
                }
                tracing::warn!(command_id = %command_id, "Command timed out waiting for ack");
                // The slot stays behind, keeping the command in flight
                // until a late ack or the TTL sweep settles it.
                None
            }
            Ok(TimeoutOutcome::AlreadyTerminal(result)) => {
                self.waiters.discard(command_id);
                result
            }
            Ok(TimeoutOutcome::Unknown) => {
                self.waiters.discard(command_id);
                None
            }
            Err(e) => {
                tracing::warn!(command_id = %command_id, error = %e, "Timeout arbitration failed");
                self.waiters.discard(command_id);
                None
            }
        }
    }

    /// Clear the at-least-once in-flight entry for an acked command.
    async fn settle_delivery(&self, status: &CommandStatus) {
        let key = QueueKey::new(status.cluster_id.clone(), status.topic);
        let _ = self.backend.settle(key, status.command_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::config::MemoryBackendConfig;

    fn bus() -> CommandBus {
        CommandBus::new(BusConfig::default())
    }

    fn command(action: &str) -> Command {
        Command::new("prod-east", Topic::Ops, action)
    }

    #[tokio::test]
    async fn enqueue_then_deliver() {
        let bus = bus();
        let id = bus
            .enqueue_command("prod-east", "ops", command("restart_pod"))
            .await
            .unwrap();

        let status = bus.get_command_status(id).await.unwrap();
        assert_eq!(status.state, CommandState::Pending);

        let delivered = bus
            .wait_command("prod-east", "ops", Duration::ZERO, &CancelSignal::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.id, id);

        let status = bus.get_command_status(id).await.unwrap();
        assert_eq!(status.state, CommandState::Running);
    }

    #[tokio::test]
    async fn routing_arguments_win_over_command_fields() {
        let bus = bus();
        let mislabelled = Command::new("somewhere-else", Topic::Ai, "restart_pod");
        let id = bus
            .enqueue_command("prod-east", "ops", mislabelled)
            .await
            .unwrap();

        let delivered = bus
            .wait_command("prod-east", "ops", Duration::ZERO, &CancelSignal::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.id, id);
        assert_eq!(delivered.cluster_id, "prod-east");
        assert_eq!(delivered.topic, Topic::Ops);
    }

    #[tokio::test]
    async fn unknown_topic_is_rejected() {
        let bus = bus();
        let result = bus
            .enqueue_command("prod-east", "gossip", command("noop"))
            .await;
        assert!(matches!(result, Err(EnqueueError::InvalidTopic { .. })));

        let result = bus.enqueue_command("", "ops", command("noop")).await;
        assert!(matches!(result, Err(EnqueueError::InvalidTopic { .. })));
    }

    #[tokio::test]
    async fn polling_unknown_topic_degrades_to_idle() {
        let bus = bus();
        let polled = bus
            .wait_command("prod-east", "gossip", Duration::ZERO, &CancelSignal::new())
            .await
            .unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn rejected_enqueue_leaves_no_trace() {
        let config = BusConfig::default()
            .with_backend_memory(MemoryBackendConfig::new().max_queue_depth(1));
        let bus = CommandBus::new(config);

        bus.enqueue_command("prod-east", "ops", command("first"))
            .await
            .unwrap();

        let second = command("second");
        let rejected_id = second.id;
        let result = bus.enqueue_command("prod-east", "ops", second).await;
        assert!(matches!(result, Err(EnqueueError::QueueFull { .. })));

        assert!(bus.get_command_status(rejected_id).await.is_none());
        assert_eq!(bus.waiter_count(), 1, "only the accepted command holds a slot");
    }

    #[tokio::test]
    async fn inflight_ceiling_applies_backpressure() {
        let bus = CommandBus::new(BusConfig::default().with_max_inflight_waiters(1));

        bus.enqueue_command("prod-east", "ops", command("first"))
            .await
            .unwrap();
        let result = bus
            .enqueue_command("prod-east", "ops", command("second"))
            .await;
        assert!(matches!(result, Err(EnqueueError::QueueFull { .. })));
    }

    #[tokio::test]
    async fn ack_completes_and_status_reports_it() {
        let bus = bus();
        let id = bus
            .enqueue_command("prod-east", "ops", command("scale"))
            .await
            .unwrap();
        bus.wait_command("prod-east", "ops", Duration::ZERO, &CancelSignal::new())
            .await
            .unwrap()
            .unwrap();

        bus.ack_command(CommandResult::success(id, serde_json::json!({"replicas": 5})))
            .await
            .unwrap();

        let status = bus.get_command_status(id).await.unwrap();
        assert_eq!(status.state, CommandState::Success);
        assert!(status.result.is_some());

        // Result is served from the status row without parking.
        let result = bus.wait_command_result(id, Duration::ZERO).await.unwrap();
        assert_eq!(result.command_id, id);
    }

    #[tokio::test]
    async fn ack_unknown_command() {
        let bus = bus();
        let result = bus
            .ack_command(CommandResult::success(CommandId::new(), serde_json::Value::Null))
            .await;
        assert!(matches!(result, Err(AckError::UnknownCommand(_))));
    }

    #[tokio::test]
    async fn duplicate_ack_is_silent_and_counted() {
        let bus = bus();
        let id = bus
            .enqueue_command("prod-east", "ops", command("noop"))
            .await
            .unwrap();
        bus.wait_command("prod-east", "ops", Duration::ZERO, &CancelSignal::new())
            .await
            .unwrap();

        let result = CommandResult::success(id, serde_json::Value::Null);
        bus.ack_command(result.clone()).await.unwrap();
        bus.ack_command(result.clone()).await.unwrap();
        bus.ack_command(result).await.unwrap();

        assert_eq!(bus.metrics().duplicate_acks.get(), 2);
        let status = bus.get_command_status(id).await.unwrap();
        assert_eq!(status.state, CommandState::Success);
    }

    #[tokio::test]
    async fn result_wait_on_untracked_command_times_out() {
        let bus = bus();
        let result = bus
            .wait_command_result(CommandId::new(), Duration::from_millis(20))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cancelled_poll_reports_cancelled() {
        let bus = bus();
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = bus
            .wait_command("prod-east", "ops", Duration::from_secs(1), &cancel)
            .await;
        assert!(matches!(result, Err(WaitError::Cancelled)));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_commands() {
        let bus = bus();
        bus.shutdown().await;

        let result = bus
            .enqueue_command("prod-east", "ops", command("noop"))
            .await;
        assert!(matches!(result, Err(EnqueueError::Backend(_))));
        assert!(!bus.health_check().await);
    }
}
