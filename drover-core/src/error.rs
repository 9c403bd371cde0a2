//! Error taxonomy for the dispatch bus.
//!
//! Each bus operation has its own error enum so callers match on exactly the
//! failures that operation can produce. [`BackendError`] is cross-cutting:
//! the in-memory backend never raises `Unavailable`, but remote backends
//! surface connectivity loss through it on every operation.
//!
//! Timed-out waits are not errors; they come back as `Ok(None)` / `None`.

use crate::types::{CommandId, QueueKey};
use thiserror::Error;

/// Errors raised by the backend boundary (queue + status table).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The per-key queue has reached capacity.
    #[error("Queue full for {key}: {current}/{max} pending commands")]
    QueueFull {
        /// Routing key of the saturated queue.
        key: QueueKey,
        /// Current queue depth.
        current: usize,
        /// Maximum queue depth.
        max: usize,
    },

    /// The backend cannot be reached.
    #[error("Backend '{backend}' unavailable: {reason}")]
    Unavailable {
        /// Backend name (e.g. `memory`).
        backend: String,
        /// Backend-specific cause.
        reason: String,
    },

    /// The backend is shutting down and no longer accepts work.
    #[error("Backend is shutting down")]
    ShuttingDown,
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by `enqueue_command`.
///
/// Invalid input is rejected here, synchronously, and never reaches the
/// queue; this is the only validation layer in the bus.
#[derive(Debug, Clone, Error)]
pub enum EnqueueError {
    /// The routing key is empty or the topic is not recognized.
    #[error("Unrecognized routing key '{cluster_id}/{topic}'")]
    InvalidTopic {
        /// Cluster the command was addressed to.
        cluster_id: String,
        /// The rejected topic string.
        topic: String,
    },

    /// Backpressure: the queue or the in-flight waiter ceiling is saturated.
    #[error("Queue full for {key}: {current}/{max}")]
    QueueFull {
        /// Routing key of the rejected command.
        key: QueueKey,
        /// Occupancy of whichever bound tripped.
        current: usize,
        /// The configured bound.
        max: usize,
    },

    /// Backend failure.
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for EnqueueError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::QueueFull { key, current, max } => Self::QueueFull { key, current, max },
            other => Self::Backend(other),
        }
    }
}

/// Errors raised by `wait_command`.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// The caller's cancellation signal (or bus shutdown) fired first.
    #[error("Wait cancelled")]
    Cancelled,

    /// Backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised by `ack_command`.
#[derive(Debug, Clone, Error)]
pub enum AckError {
    /// No status row exists for the acked command.
    #[error("Command {0} not found")]
    UnknownCommand(CommandId),

    /// Backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
