//! Pluggable backends for command queueing and status tracking.
//!
//! This module provides an abstraction over where pending commands and their
//! status rows live. The bus composes the two concerns behind one trait so a
//! durable implementation (Redis, NATS, a database) can replace the default
//! without touching dispatch semantics:
//!
//! - **Memory** (default): Process-local, zero external dependencies
//!
//! # Example
//!
//! ```ignore
//! use drover_bus::backend::{BusBackend, MemoryBackend};
//! use drover_core::config::MemoryBackendConfig;
//!
//! let backend = MemoryBackend::new(MemoryBackendConfig::default());
//!
//! // Producer side
//! backend.push(command).await?;
//!
//! // Agent side
//! let outcome = backend
//!     .pop_blocking(key, timeout, cancel)
//!     .await?;
//! ```

mod traits;

pub use traits::{BackendFuture, BusBackend, CompletionOutcome, TimeoutOutcome};

/// Default in-memory backend for testing and single-node deployments.
pub mod memory;
pub use memory::MemoryBackend;
