//! Bus and backend configuration.
//!
//! Configuration is plain serde data with environment overrides, so the
//! same struct can come from a config file or from `DROVER_BUS_*` variables.
//!
//! # Example
//!
//! ```
//! use drover_core::config::{BusConfig, MemoryBackendConfig};
//!
//! let config = BusConfig::default()
//!     .with_backend_memory(MemoryBackendConfig::new().max_queue_depth(500))
//!     .with_max_inflight_waiters(1_000);
//! assert_eq!(config.backend.backend_name(), "memory");
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery semantics of the topic queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryMode {
    /// A popped command is forgotten by the queue. A consumer that crashes
    /// mid-execution loses the command (the status table still times out).
    #[default]
    AtMostOnce,

    /// A popped command stays tracked in-flight until acked. If the
    /// visibility timeout lapses first, it is redelivered with a higher
    /// attempt counter.
    AtLeastOnce {
        /// How long a delivered command may stay unacked before redelivery.
        visibility_timeout_ms: u64,
    },
}

impl DeliveryMode {
    /// The visibility timeout, if this mode has one.
    #[must_use]
    pub fn visibility_timeout(&self) -> Option<Duration> {
        match self {
            Self::AtMostOnce => None,
            Self::AtLeastOnce {
                visibility_timeout_ms,
            } => Some(Duration::from_millis(*visibility_timeout_ms)),
        }
    }
}

/// Configuration for the in-memory backend.
///
/// The depth bound applies to each `(cluster, topic)` queue independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    /// Maximum per-key queue depth before backpressure is applied.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Delivery semantics.
    #[serde(default)]
    pub delivery: DeliveryMode,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
            delivery: DeliveryMode::default(),
        }
    }
}

impl MemoryBackendConfig {
    /// Create a new memory backend config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum per-key queue depth.
    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Enable at-least-once delivery with the given visibility timeout.
    pub fn at_least_once(mut self, visibility_timeout_ms: u64) -> Self {
        self.delivery = DeliveryMode::AtLeastOnce {
            visibility_timeout_ms,
        };
        self
    }
}

fn default_max_queue_depth() -> usize {
    10_000
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

/// Configuration for the dispatch backend.
///
/// The default is `Memory`; remote backends plug in behind the same trait
/// and add their variants here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory backend (single-node, no persistence).
    Memory(MemoryBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory(MemoryBackendConfig::default())
    }
}

impl BackendConfig {
    /// Create a memory backend config with defaults.
    pub fn memory() -> Self {
        Self::Memory(MemoryBackendConfig::default())
    }

    /// Create a memory backend config with custom settings.
    pub fn memory_with(config: MemoryBackendConfig) -> Self {
        Self::Memory(config)
    }

    /// Get the backend name.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
        }
    }

    /// Get the memory configuration, falling back to defaults for
    /// non-memory backends.
    pub fn memory_config(&self) -> MemoryBackendConfig {
        match self {
            Self::Memory(config) => config.clone(),
        }
    }
}

/// Top-level bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Which backend holds the queues and the status table.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Ceiling on registered waiter slots (in-flight commands).
    ///
    /// Enqueue past this ceiling is rejected as backpressure.
    #[serde(default = "default_max_inflight_waiters")]
    pub max_inflight_waiters: usize,

    /// How long an unclaimed waiter slot may live before the sweeper
    /// evicts it.
    #[serde(default = "default_waiter_slot_ttl_ms")]
    pub waiter_slot_ttl_ms: u64,

    /// Interval between sweeper passes (redelivery + slot eviction).
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            max_inflight_waiters: default_max_inflight_waiters(),
            waiter_slot_ttl_ms: default_waiter_slot_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl BusConfig {
    /// Set a memory backend with custom settings.
    pub fn with_backend_memory(mut self, config: MemoryBackendConfig) -> Self {
        self.backend = BackendConfig::Memory(config);
        self
    }

    /// Set the in-flight waiter ceiling.
    pub fn with_max_inflight_waiters(mut self, max: usize) -> Self {
        self.max_inflight_waiters = max;
        self
    }

    /// Set the waiter slot TTL.
    pub fn with_waiter_slot_ttl(mut self, ttl: Duration) -> Self {
        self.waiter_slot_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set the sweeper interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// The waiter slot TTL as a [`Duration`].
    #[must_use]
    pub fn waiter_slot_ttl(&self) -> Duration {
        Duration::from_millis(self.waiter_slot_ttl_ms)
    }

    /// The sweeper interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Create a bus config from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DROVER_BUS_BACKEND`: backend type (`memory`)
    /// - `DROVER_BUS_MAX_QUEUE_DEPTH`: per-key queue bound
    /// - `DROVER_BUS_DELIVERY`: `at_most_once` (default) or `at_least_once`
    /// - `DROVER_BUS_VISIBILITY_TIMEOUT_MS`: redelivery timeout for
    ///   at-least-once mode
    /// - `DROVER_BUS_MAX_INFLIGHT_WAITERS`: waiter slot ceiling
    /// - `DROVER_BUS_WAITER_SLOT_TTL_MS`: unclaimed slot lifetime
    /// - `DROVER_BUS_SWEEP_INTERVAL_MS`: sweeper interval
    ///
    /// Returns `None` if `DROVER_BUS_BACKEND` is not set. An unknown backend
    /// falls back to memory with a warning.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("DROVER_BUS_BACKEND").ok()?;

        let memory = {
            let mut config = MemoryBackendConfig::default();
            if let Some(depth) = env_parse::<usize>("DROVER_BUS_MAX_QUEUE_DEPTH") {
                config.max_queue_depth = depth;
            }
            if let Ok(delivery) = std::env::var("DROVER_BUS_DELIVERY") {
                match delivery.to_lowercase().as_str() {
                    "at_least_once" => {
                        let visibility = env_parse::<u64>("DROVER_BUS_VISIBILITY_TIMEOUT_MS")
                            .unwrap_or_else(default_visibility_timeout_ms);
                        config = config.at_least_once(visibility);
                    }
                    "at_most_once" => {}
                    unknown => {
                        tracing::warn!(
                            delivery = %unknown,
                            "Unknown delivery mode, falling back to at_most_once"
                        );
                    }
                }
            }
            config
        };

        let backend = match backend.to_lowercase().as_str() {
            "memory" => BackendConfig::Memory(memory),
            unknown => {
                tracing::warn!(backend = %unknown, "Unknown bus backend, falling back to memory");
                BackendConfig::Memory(memory)
            }
        };

        let mut config = Self {
            backend,
            ..Self::default()
        };
        if let Some(max) = env_parse::<usize>("DROVER_BUS_MAX_INFLIGHT_WAITERS") {
            config.max_inflight_waiters = max;
        }
        if let Some(ttl) = env_parse::<u64>("DROVER_BUS_WAITER_SLOT_TTL_MS") {
            config.waiter_slot_ttl_ms = ttl;
        }
        if let Some(interval) = env_parse::<u64>("DROVER_BUS_SWEEP_INTERVAL_MS") {
            config.sweep_interval_ms = interval;
        }

        Some(config)
    }

    /// Create a bus config from environment variables, or use the default.
    pub fn from_env_or_default() -> Self {
        Self::from_env().unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn default_max_inflight_waiters() -> usize {
    10_000
}

fn default_waiter_slot_ttl_ms() -> u64 {
    300_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = BusConfig::default();
        assert_eq!(config.backend.backend_name(), "memory");
        assert_eq!(config.max_inflight_waiters, 10_000);
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.waiter_slot_ttl(), Duration::from_secs(300));

        let memory = config.backend.memory_config();
        assert_eq!(memory.max_queue_depth, 10_000);
        assert_eq!(memory.delivery, DeliveryMode::AtMostOnce);
    }

    #[test]
    fn builder_pattern() {
        let config = BusConfig::default()
            .with_backend_memory(MemoryBackendConfig::new().max_queue_depth(50).at_least_once(500))
            .with_max_inflight_waiters(100)
            .with_sweep_interval(Duration::from_millis(25));

        let memory = config.backend.memory_config();
        assert_eq!(memory.max_queue_depth, 50);
        assert_eq!(
            memory.delivery.visibility_timeout(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(config.max_inflight_waiters, 100);
        assert_eq!(config.sweep_interval_ms, 25);
    }

    #[test]
    fn config_serialization() {
        let config = BusConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"backend\":\"memory\""));
        assert!(json.contains("at_most_once"));

        let parsed: BusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.backend.backend_name(), "memory");
    }

    #[test]
    fn delivery_mode_deserializes_with_tag() {
        let json = r#"{"mode":"at_least_once","visibility_timeout_ms":2500}"#;
        let mode: DeliveryMode = serde_json::from_str(json).unwrap();
        assert_eq!(mode.visibility_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn from_env_lifecycle() {
        // SAFETY: Tests run single-threaded with --test-threads=1 or serially
        unsafe { std::env::remove_var("DROVER_BUS_BACKEND") };
        assert!(BusConfig::from_env().is_none());
        assert_eq!(
            BusConfig::from_env_or_default().backend.backend_name(),
            "memory"
        );

        // SAFETY: Tests run single-threaded with --test-threads=1 or serially
        unsafe {
            std::env::set_var("DROVER_BUS_BACKEND", "memory");
            std::env::set_var("DROVER_BUS_MAX_QUEUE_DEPTH", "250");
            std::env::set_var("DROVER_BUS_DELIVERY", "at_least_once");
            std::env::set_var("DROVER_BUS_VISIBILITY_TIMEOUT_MS", "750");
            std::env::set_var("DROVER_BUS_MAX_INFLIGHT_WAITERS", "42");
            std::env::set_var("DROVER_BUS_WAITER_SLOT_TTL_MS", "60000");
        }
        let config = BusConfig::from_env().unwrap();
        let memory = config.backend.memory_config();
        assert_eq!(memory.max_queue_depth, 250);
        assert_eq!(
            memory.delivery.visibility_timeout(),
            Some(Duration::from_millis(750))
        );
        assert_eq!(config.max_inflight_waiters, 42);
        assert_eq!(config.waiter_slot_ttl(), Duration::from_secs(60));

        // Unknown backend falls back to memory
        // SAFETY: Tests run single-threaded with --test-threads=1 or serially
        unsafe { std::env::set_var("DROVER_BUS_BACKEND", "etcd") };
        let config = BusConfig::from_env().unwrap();
        assert_eq!(config.backend.backend_name(), "memory");

        // SAFETY: Tests run single-threaded with --test-threads=1 or serially
        unsafe {
            std::env::remove_var("DROVER_BUS_BACKEND");
            std::env::remove_var("DROVER_BUS_MAX_QUEUE_DEPTH");
            std::env::remove_var("DROVER_BUS_DELIVERY");
            std::env::remove_var("DROVER_BUS_VISIBILITY_TIMEOUT_MS");
            std::env::remove_var("DROVER_BUS_MAX_INFLIGHT_WAITERS");
            std::env::remove_var("DROVER_BUS_WAITER_SLOT_TTL_MS");
        }
    }
}
