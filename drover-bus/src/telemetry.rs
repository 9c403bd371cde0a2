//! Tracing subscriber setup with format selection.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for structured logging (ELK, Loki).
    Json,
    /// Human-readable pretty format with colors.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::default(),
        })
    }
}

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log output format.
    log_format: LogFormat,
    /// Log level filter (e.g., "info", "debug,drover=trace").
    log_filter: String,
    /// Whether to include source location in logs.
    include_location: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            include_location: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DROVER_LOG_FORMAT`: "json", "pretty", or "compact"
    /// - `DROVER_LOG_LEVEL` or `RUST_LOG`: Log filter string
    /// - `DROVER_LOG_LOCATION`: "true" to include file and line
    pub fn from_env() -> Self {
        let log_format = env::var("DROVER_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse::<LogFormat>().ok())
            .unwrap_or_default();

        let log_filter = env::var("DROVER_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let include_location = env::var("DROVER_LOG_LOCATION")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        Self {
            log_format,
            log_filter,
            include_location,
        }
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Set the log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup, before the bus starts handling commands.
///
/// # Example
///
/// ```ignore
/// drover_bus::telemetry::init_tracing(&TelemetryConfig::from_env())?;
/// ```
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_target(true)
                        .flatten_event(true),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_target(true),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_target(true),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
    }
    Ok(())
}
