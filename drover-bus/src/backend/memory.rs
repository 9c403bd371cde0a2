//! In-memory backend: per-key queues plus a process-local status table.

use super::traits::{BackendFuture, BusBackend, CompletionOutcome, TimeoutOutcome};
use crate::cancel::CancelSignal;
use crate::queue::{PopOutcome, TopicQueue};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use drover_core::config::MemoryBackendConfig;
use drover_core::error::BackendError;
use drover_core::{Command, CommandId, CommandResult, CommandState, CommandStatus, QueueKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local backend holding queues and status rows in [`DashMap`]s.
///
/// Queues are created lazily per routing key, so contention stays on the
/// key actually being pushed or popped. Terminal-state arbitration rides on
/// the per-key exclusive guard of the status map: racing writers serialize
/// there and exactly one observes the non-terminal row.
pub struct MemoryBackend {
    config: MemoryBackendConfig,
    queues: DashMap<QueueKey, Arc<TopicQueue>>,
    statuses: DashMap<CommandId, CommandStatus>,
    shutting_down: AtomicBool,
    /// Wakes every parked pop when shutdown begins.
    shutdown_signal: CancelSignal,
}

impl MemoryBackend {
    /// Create a backend with the given configuration.
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            config,
            queues: DashMap::new(),
            statuses: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            shutdown_signal: CancelSignal::new(),
        }
    }

    /// The configuration this backend was built with.
    pub fn config(&self) -> &MemoryBackendConfig {
        &self.config
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn queue(&self, key: &QueueKey) -> Arc<TopicQueue> {
        self.queues
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TopicQueue::new(key.clone(), &self.config)))
            .clone()
    }

    fn queue_if_exists(&self, key: &QueueKey) -> Option<Arc<TopicQueue>> {
        self.queues.get(key).map(|entry| entry.clone())
    }

    fn all_queues(&self) -> Vec<Arc<TopicQueue>> {
        self.queues.iter().map(|entry| entry.clone()).collect()
    }

    fn pending_total(&self) -> usize {
        self.all_queues().iter().map(|queue| queue.depth()).sum()
    }

    fn in_flight_total(&self) -> usize {
        self.all_queues()
            .iter()
            .map(|queue| queue.in_flight_count())
            .sum()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryBackendConfig::default())
    }
}

impl BusBackend for MemoryBackend {
    fn push(&self, command: Command) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if self.is_shutting_down() {
                return Err(BackendError::ShuttingDown);
            }
            let key = command.key();
            let queue = self.queue(&key);
            queue.push(command)?;
            tracing::debug!(key = %key, depth = queue.depth(), "Command queued");
            Ok(())
        })
    }

    fn push_front(&self, command: Command) -> BackendFuture<'_, ()> {
        // Push-back must succeed even mid-shutdown so cancellation never
        // drops a command.
        Box::pin(async move {
            let key = command.key();
            self.queue(&key).push_front(command);
            Ok(())
        })
    }

    fn pop_blocking(
        &self,
        key: QueueKey,
        timeout: std::time::Duration,
        cancel: CancelSignal,
    ) -> BackendFuture<'_, PopOutcome> {
        Box::pin(async move {
            if self.is_shutting_down() {
                return Ok(PopOutcome::Cancelled);
            }
            let queue = self.queue(&key);
            tokio::select! {
                outcome = queue.pop_blocking(timeout, &cancel) => Ok(outcome),
                _ = self.shutdown_signal.cancelled() => Ok(PopOutcome::Cancelled),
            }
        })
    }

    fn settle(&self, key: QueueKey, command_id: CommandId) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            Ok(self
                .queue_if_exists(&key)
                .map(|queue| queue.settle(command_id))
                .unwrap_or(false))
        })
    }

    fn sweep_expired(&self) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            let now = Utc::now();
            Ok(self
                .all_queues()
                .iter()
                .map(|queue| queue.sweep_expired(now))
                .sum())
        })
    }

    fn queue_depth(&self, key: QueueKey) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            Ok(self
                .queue_if_exists(&key)
                .map(|queue| queue.depth())
                .unwrap_or(0))
        })
    }

    fn pending_count(&self) -> BackendFuture<'_, usize> {
        Box::pin(async move { Ok(self.pending_total()) })
    }

    fn in_flight_count(&self) -> BackendFuture<'_, usize> {
        Box::pin(async move { Ok(self.in_flight_total()) })
    }

    fn insert_status(&self, status: CommandStatus) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.statuses.insert(status.command_id, status);
            Ok(())
        })
    }

    fn remove_status(&self, command_id: CommandId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.statuses.remove(&command_id);
            Ok(())
        })
    }

    fn get_status(&self, command_id: CommandId) -> BackendFuture<'_, Option<CommandStatus>> {
        Box::pin(async move { Ok(self.statuses.get(&command_id).map(|row| row.clone())) })
    }

    fn mark_running(
        &self,
        command_id: CommandId,
        started_at: DateTime<Utc>,
    ) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            let Some(mut row) = self.statuses.get_mut(&command_id) else {
                return Ok(false);
            };
            if row.state != CommandState::Pending {
                return Ok(false);
            }
            row.state = CommandState::Running;
            row.started_at = Some(started_at);
            Ok(true)
        })
    }

    fn complete(&self, result: CommandResult) -> BackendFuture<'_, CompletionOutcome> {
        Box::pin(async move {
            let Some(mut row) = self.statuses.get_mut(&result.command_id) else {
                return Ok(CompletionOutcome::Unknown);
            };
            if !row.state.is_terminal() {
                row.state = if result.success {
                    CommandState::Success
                } else {
                    CommandState::Failed
                };
                row.finished_at = Some(result.finished_at);
                row.result = Some(result);
                return Ok(CompletionOutcome::Completed);
            }
            if row.state == CommandState::Timeout && row.result.is_none() {
                row.acked_late = true;
                row.result = Some(result);
                return Ok(CompletionOutcome::RecordedLate);
            }
            Ok(CompletionOutcome::AlreadyTerminal(row.state))
        })
    }

    fn mark_timeout(
        &self,
        command_id: CommandId,
        finished_at: DateTime<Utc>,
    ) -> BackendFuture<'_, TimeoutOutcome> {
        Box::pin(async move {
            let Some(mut row) = self.statuses.get_mut(&command_id) else {
                return Ok(TimeoutOutcome::Unknown);
            };
            if row.state.is_terminal() {
                return Ok(TimeoutOutcome::AlreadyTerminal(row.result.clone()));
            }
            row.state = CommandState::Timeout;
            row.finished_at = Some(finished_at);
            Ok(TimeoutOutcome::Marked)
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn health_check(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move { Ok(!self.is_shutting_down()) })
    }

    fn shutdown(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.shutting_down.store(true, Ordering::SeqCst);
            self.shutdown_signal.cancel();
            tracing::info!(
                pending = self.pending_total(),
                in_flight = self.in_flight_total(),
                "Memory backend shut down"
            );
            Ok(())
        })
    }
}
