//! Core backend trait and operation outcomes.

use crate::cancel::CancelSignal;
use crate::queue::PopOutcome;
use chrono::{DateTime, Utc};
use drover_core::error::BackendResult;
use drover_core::{Command, CommandId, CommandResult, CommandState, CommandStatus, QueueKey};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Type alias for async backend futures.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// How a terminal write landed in the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The command was non-terminal; the result is now its terminal state.
    Completed,
    /// The command had already timed out without a result; the late result
    /// was attached to the existing `Timeout` row.
    RecordedLate,
    /// A terminal result already exists; this write was discarded.
    AlreadyTerminal(CommandState),
    /// No status row exists for this command.
    Unknown,
}

/// How a timeout write landed in the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The command was non-terminal and is now `Timeout`.
    Marked,
    /// An ack won the race; the existing terminal result (if any) is
    /// returned so the caller can hand it out.
    AlreadyTerminal(Option<CommandResult>),
    /// No status row exists for this command.
    Unknown,
}

/// Trait for command bus backends.
///
/// A backend is responsible for:
/// - Queueing commands per `(cluster, topic)` routing key
/// - Blocking agents until work, a deadline, or cancellation
/// - Holding the authoritative status row for every tracked command
/// - Arbitrating racing terminal writes (first one wins)
///
/// # Implementation Notes
///
/// - All methods are async and must be `Send`
/// - Backends should implement backpressure via `push` returning `QueueFull`
/// - `pop_blocking` must honor prompt cancellation without losing commands
/// - Terminal-state arbitration must be atomic per command
pub trait BusBackend: Send + Sync {
    /// Append a command to its routing-key queue.
    ///
    /// # Errors
    ///
    /// - `QueueFull` if the queue has reached capacity
    /// - `ShuttingDown` once shutdown has begun
    fn push(&self, command: Command) -> BackendFuture<'_, ()>;

    /// Requeue a command at the head of its routing-key queue.
    ///
    /// Used for cancellation push-back; the depth bound does not apply.
    fn push_front(&self, command: Command) -> BackendFuture<'_, ()>;

    /// Remove the head of `key`'s queue, parking up to `timeout` if empty.
    ///
    /// The outcome names why the pop woke: a delivery, an empty deadline, or
    /// `cancel` firing first.
    fn pop_blocking(
        &self,
        key: QueueKey,
        timeout: Duration,
        cancel: CancelSignal,
    ) -> BackendFuture<'_, PopOutcome>;

    /// Settle an in-flight command after its ack (at-least-once mode).
    ///
    /// Returns whether an in-flight entry existed.
    fn settle(&self, key: QueueKey, command_id: CommandId) -> BackendFuture<'_, bool>;

    /// Requeue commands whose visibility timeout lapsed. Returns the number
    /// redelivered across all queues.
    fn sweep_expired(&self) -> BackendFuture<'_, usize>;

    /// Current depth of `key`'s queue.
    fn queue_depth(&self, key: QueueKey) -> BackendFuture<'_, usize>;

    /// Pending commands across all queues.
    fn pending_count(&self) -> BackendFuture<'_, usize>;

    /// Delivered-but-unacked commands across all queues.
    fn in_flight_count(&self) -> BackendFuture<'_, usize>;

    /// Insert a freshly-tracked command's status row.
    fn insert_status(&self, status: CommandStatus) -> BackendFuture<'_, ()>;

    /// Drop a command's status row (enqueue rollback).
    fn remove_status(&self, command_id: CommandId) -> BackendFuture<'_, ()>;

    /// Read a command's status row.
    fn get_status(&self, command_id: CommandId) -> BackendFuture<'_, Option<CommandStatus>>;

    /// Transition a command from `Pending` to `Running`.
    ///
    /// Returns whether the transition applied; any other current state
    /// leaves the row untouched.
    fn mark_running(
        &self,
        command_id: CommandId,
        started_at: DateTime<Utc>,
    ) -> BackendFuture<'_, bool>;

    /// Apply an acked result to the status table.
    ///
    /// Exactly one racing terminal write per command may observe
    /// [`CompletionOutcome::Completed`].
    fn complete(&self, result: CommandResult) -> BackendFuture<'_, CompletionOutcome>;

    /// Mark a command `Timeout` unless a terminal write already landed.
    fn mark_timeout(
        &self,
        command_id: CommandId,
        finished_at: DateTime<Utc>,
    ) -> BackendFuture<'_, TimeoutOutcome>;

    /// Short name for logs and diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Check if the backend is healthy and reachable.
    fn health_check(&self) -> BackendFuture<'_, bool>;

    /// Gracefully shutdown the backend.
    ///
    /// This should:
    /// 1. Stop accepting new pushes
    /// 2. Wake every parked pop with a cancellation outcome
    fn shutdown(&self) -> BackendFuture<'_, ()>;
}
