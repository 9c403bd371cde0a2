//! Drover Bus - Command dispatch for multi-cluster operations.
//!
//! This crate provides the dispatch machinery between control-plane
//! producers and per-cluster agents:
//! - Per-`(cluster, topic)` FIFO queues with bounded depth
//! - Long-poll delivery with prompt cancellation and no silent loss
//! - One-shot rendezvous between acks and parked result waiters
//! - Race-free timeout arbitration with late-ack recording
//! - Pluggable backend boundary (in-memory reference included)
//! - Background sweeper for redelivery and slot eviction
//! - Prometheus metrics and structured audit logging
//!
//! # Example
//!
//! ```
//! use drover_bus::{CancelSignal, CommandBus};
//! use drover_core::config::BusConfig;
//! use drover_core::{Command, CommandResult, Topic};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = CommandBus::new(BusConfig::default());
//!
//! // Producer side
//! let command = Command::new("prod-east", Topic::Ops, "restart_pod");
//! let command_id = bus.enqueue_command("prod-east", "ops", command).await?;
//!
//! // Agent side
//! let cancel = CancelSignal::new();
//! if let Some(delivered) = bus
//!     .wait_command("prod-east", "ops", Duration::from_millis(50), &cancel)
//!     .await?
//! {
//!     let result = CommandResult::success(delivered.id, serde_json::json!({"ok": true}));
//!     bus.ack_command(result).await?;
//! }
//!
//! // Producer collects the outcome
//! let result = bus.wait_command_result(command_id, Duration::from_secs(1)).await;
//! assert!(result.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod backend;
pub mod bus;
pub mod cancel;
pub mod metrics;
pub mod queue;
pub mod sweeper;
pub mod telemetry;
pub mod waiter;

pub use audit::{CommandAuditEvent, CommandAuditSink, LogAuditSink};
pub use backend::{BackendFuture, BusBackend, CompletionOutcome, MemoryBackend, TimeoutOutcome};
pub use bus::CommandBus;
pub use cancel::CancelSignal;
pub use metrics::BusMetrics;
pub use queue::{PopOutcome, TopicQueue};
pub use sweeper::ExpirySweeper;
pub use waiter::{PrepareOutcome, RegisterOutcome, ResultWaiter, WaiterRegistry};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::audit::{CommandAuditSink, LogAuditSink};
    pub use crate::backend::{BusBackend, CompletionOutcome, MemoryBackend, TimeoutOutcome};
    pub use crate::bus::CommandBus;
    pub use crate::cancel::CancelSignal;
    pub use crate::metrics::BusMetrics;
    pub use crate::queue::PopOutcome;
    pub use crate::sweeper::ExpirySweeper;
    pub use crate::waiter::{RegisterOutcome, WaiterRegistry};
    pub use drover_core::config::{BackendConfig, BusConfig, DeliveryMode, MemoryBackendConfig};
    pub use drover_core::error::{AckError, BackendError, EnqueueError, WaitError};
    pub use drover_core::{
        Command, CommandId, CommandResult, CommandState, CommandStatus, QueueKey, Topic,
    };
}
