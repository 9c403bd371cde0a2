//! Drover Core Library
//!
//! This crate provides the foundational types for the Drover multi-cluster
//! operations platform: the command model, the status state machine, the
//! dispatch error taxonomy, and bus configuration.
//!
//! # Overview
//!
//! Drover routes commands from producers (operators, automation engines) to
//! per-cluster agents that dial home and long-poll for work. Everything here
//! is backend-agnostic: the types are shared between the bus, its backends,
//! and the transport layer that fronts them.
//!
//! # Key Components
//!
//! - **Command model**: [`Command`], [`CommandResult`], [`CommandStatus`]
//!   and the forward-only [`CommandState`] machine
//! - **Types**: strongly-typed [`CommandId`], [`Topic`], [`QueueKey`]
//! - **Errors**: per-operation enums plus the cross-cutting [`BackendError`]
//! - **Config**: [`BusConfig`] with serde defaults and `DROVER_BUS_*`
//!   environment overrides
//!
//! # Example
//!
//! ```
//! use drover_core::{Command, CommandState, Topic};
//!
//! let command = Command::builder("prod-east", Topic::Ops, "restart_deployment")
//!     .payload(serde_json::json!({"name": "api"}))
//!     .build();
//!
//! assert_eq!(command.key().to_string(), "prod-east/ops");
//! assert!(CommandState::Pending.can_transition(CommandState::Running));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod config;
pub mod error;
pub mod types;

// Re-export key types at crate root for convenience
pub use command::{Command, CommandBuilder, CommandResult, CommandState, CommandStatus};
pub use config::{BackendConfig, BusConfig, DeliveryMode, MemoryBackendConfig};
pub use error::{AckError, BackendError, BackendResult, EnqueueError, WaitError};
pub use types::{CommandId, QueueKey, Topic};
