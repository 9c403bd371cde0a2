//! Prometheus metrics for the command bus.
//!
//! # Metrics
//!
//! ## Counters
//! - `drover_commands_enqueued_total` - Commands accepted onto the bus
//! - `drover_commands_delivered_total` - Commands handed to agents
//! - `drover_commands_acked_total` - Acks applied, labelled by outcome
//! - `drover_duplicate_acks_total` - Acks discarded as duplicates
//! - `drover_commands_timed_out_total` - Waits that expired without an ack
//! - `drover_waiters_rejected_total` - Waiter registrations refused
//! - `drover_redeliveries_total` - Commands requeued by the visibility sweep
//! - `drover_stale_waiter_slots_total` - Rendezvous slots evicted by TTL
//!
//! ## Gauges
//! - `drover_queue_depth` - Pending commands across all queues
//! - `drover_in_flight_commands` - Delivered-but-unacked commands
//! - `drover_registered_waiters` - Rendezvous slots currently held
//!
//! ## Histograms
//! - `drover_command_turnaround_seconds` - Enqueue-to-terminal latency

use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Default histogram buckets for command turnaround (in seconds).
const TURNAROUND_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Bus metrics registry.
///
/// Contains all Prometheus metrics for the command dispatch path.
pub struct BusMetrics {
    /// The Prometheus registry.
    registry: Registry,

    // Counters (with labels)
    /// Commands accepted, by cluster and topic.
    pub commands_enqueued: CounterVec,
    /// Commands handed to agents, by cluster and topic.
    pub commands_delivered: CounterVec,
    /// Acks applied, by outcome (`success`, `failed`, `late`).
    pub commands_acked: CounterVec,
    /// Waiter registrations refused, by reason (`registry_full`, `duplicate`).
    pub waiters_rejected: CounterVec,

    // Global counters
    /// Acks discarded because the command was already terminal.
    pub duplicate_acks: IntCounter,
    /// Result waits that expired without an ack.
    pub commands_timed_out: IntCounter,
    /// Commands requeued after their visibility timeout lapsed.
    pub redeliveries: IntCounter,
    /// Rendezvous slots evicted by the TTL sweep.
    pub stale_slots_evicted: IntCounter,

    // Gauges
    /// Pending commands across all queues.
    pub queue_depth: IntGauge,
    /// Delivered-but-unacked commands.
    pub in_flight_commands: IntGauge,
    /// Rendezvous slots currently held.
    pub registered_waiters: IntGauge,

    // Histograms
    /// Enqueue-to-terminal latency by cluster and topic.
    pub command_turnaround: HistogramVec,
}

impl BusMetrics {
    /// Create a new metrics registry with all bus metrics.
    pub fn new() -> Self {
        let registry = Registry::new();

        let commands_enqueued = CounterVec::new(
            Opts::new("commands_enqueued_total", "Commands accepted onto the bus")
                .namespace("drover")
                .const_label("service", "bus"),
            &["cluster", "topic"],
        )
        .expect("metric creation should not fail");

        let commands_delivered = CounterVec::new(
            Opts::new("commands_delivered_total", "Commands handed to agents")
                .namespace("drover")
                .const_label("service", "bus"),
            &["cluster", "topic"],
        )
        .expect("metric creation should not fail");

        let commands_acked = CounterVec::new(
            Opts::new("commands_acked_total", "Acks applied by outcome")
                .namespace("drover")
                .const_label("service", "bus"),
            &["outcome"],
        )
        .expect("metric creation should not fail");

        let waiters_rejected = CounterVec::new(
            Opts::new("waiters_rejected_total", "Waiter registrations refused")
                .namespace("drover")
                .const_label("service", "bus"),
            &["reason"],
        )
        .expect("metric creation should not fail");

        let duplicate_acks = IntCounter::with_opts(
            Opts::new("duplicate_acks_total", "Acks discarded as duplicates")
                .namespace("drover")
                .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let commands_timed_out = IntCounter::with_opts(
            Opts::new(
                "commands_timed_out_total",
                "Result waits that expired without an ack",
            )
            .namespace("drover")
            .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let redeliveries = IntCounter::with_opts(
            Opts::new(
                "redeliveries_total",
                "Commands requeued after their visibility timeout lapsed",
            )
            .namespace("drover")
            .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let stale_slots_evicted = IntCounter::with_opts(
            Opts::new(
                "stale_waiter_slots_total",
                "Rendezvous slots evicted by the TTL sweep",
            )
            .namespace("drover")
            .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let queue_depth = IntGauge::with_opts(
            Opts::new("queue_depth", "Pending commands across all queues")
                .namespace("drover")
                .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let in_flight_commands = IntGauge::with_opts(
            Opts::new("in_flight_commands", "Delivered-but-unacked commands")
                .namespace("drover")
                .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let registered_waiters = IntGauge::with_opts(
            Opts::new("registered_waiters", "Rendezvous slots currently held")
                .namespace("drover")
                .const_label("service", "bus"),
        )
        .expect("metric creation should not fail");

        let command_turnaround = HistogramVec::new(
            HistogramOpts::new(
                "command_turnaround_seconds",
                "Enqueue-to-terminal latency in seconds",
            )
            .namespace("drover")
            .const_label("service", "bus")
            .buckets(TURNAROUND_BUCKETS.to_vec()),
            &["cluster", "topic"],
        )
        .expect("metric creation should not fail");

        registry
            .register(Box::new(commands_enqueued.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(commands_delivered.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(commands_acked.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(waiters_rejected.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(duplicate_acks.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(commands_timed_out.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(redeliveries.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(stale_slots_evicted.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(in_flight_commands.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(registered_waiters.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(command_turnaround.clone()))
            .expect("registration should not fail");

        Self {
            registry,
            commands_enqueued,
            commands_delivered,
            commands_acked,
            waiters_rejected,
            duplicate_acks,
            commands_timed_out,
            redeliveries,
            stale_slots_evicted,
            queue_depth,
            in_flight_commands,
            registered_waiters,
            command_turnaround,
        }
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an accepted command.
    pub fn record_enqueued(&self, cluster: &str, topic: &str) {
        self.commands_enqueued
            .with_label_values(&[cluster, topic])
            .inc();
    }

    /// Record a command handed to an agent.
    pub fn record_delivered(&self, cluster: &str, topic: &str) {
        self.commands_delivered
            .with_label_values(&[cluster, topic])
            .inc();
    }

    /// Record an applied ack.
    pub fn record_acked(&self, outcome: &str) {
        self.commands_acked.with_label_values(&[outcome]).inc();
    }

    /// Record a discarded duplicate ack.
    pub fn record_duplicate_ack(&self) {
        self.duplicate_acks.inc();
    }

    /// Record a result wait that expired.
    pub fn record_timeout(&self) {
        self.commands_timed_out.inc();
    }

    /// Record a refused waiter registration.
    pub fn record_waiter_rejected(&self, reason: &str) {
        self.waiters_rejected.with_label_values(&[reason]).inc();
    }

    /// Record commands requeued by the visibility sweep.
    pub fn record_redeliveries(&self, count: usize) {
        self.redeliveries.inc_by(count as u64);
    }

    /// Record slots evicted by the TTL sweep.
    pub fn record_stale_slots(&self, count: usize) {
        self.stale_slots_evicted.inc_by(count as u64);
    }

    /// Observe enqueue-to-terminal latency.
    pub fn observe_turnaround(&self, cluster: &str, topic: &str, duration_secs: f64) {
        self.command_turnaround
            .with_label_values(&[cluster, topic])
            .observe(duration_secs);
    }

    /// Update the pending-command gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth);
    }

    /// Update the in-flight gauge.
    pub fn set_in_flight(&self, count: i64) {
        self.in_flight_commands.set(count);
    }

    /// Update the held-slot gauge.
    pub fn set_registered_waiters(&self, count: i64) {
        self.registered_waiters.set(count);
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .expect("encoding should not fail");

        String::from_utf8(buffer).expect("metrics should be valid UTF-8")
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance for convenience.
static GLOBAL_METRICS: std::sync::OnceLock<Arc<BusMetrics>> = std::sync::OnceLock::new();

/// Initialize the global metrics instance.
pub fn init_global_metrics() -> Arc<BusMetrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(BusMetrics::new()))
        .clone()
}

/// Get the global metrics instance.
///
/// Panics if `init_global_metrics` has not been called.
pub fn global_metrics() -> Arc<BusMetrics> {
    GLOBAL_METRICS
        .get()
        .expect("global metrics not initialized")
        .clone()
}

/// Try to get the global metrics instance, returning None if not initialized.
pub fn try_global_metrics() -> Option<Arc<BusMetrics>> {
    GLOBAL_METRICS.get().cloned()
}
