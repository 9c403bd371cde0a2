//! Audit logging for command lifecycle events.
//!
//! Provides structured audit records for operations that changed cluster
//! state: every command reaching a terminal state is reported, including
//! timeouts and late acks, so operators can reconstruct what ran where.

use drover_core::{CommandState, CommandStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Audit event severity levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Informational event (routine operation).
    Info,
    /// Warning (timed out, failed, or acked late).
    Warning,
}

/// Audit record for a command that reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAuditEvent {
    /// Timestamp in RFC3339 format.
    pub timestamp: String,
    /// Severity level.
    pub severity: AuditSeverity,
    /// The command this record describes.
    pub command_id: String,
    /// Cluster the command targeted.
    pub cluster_id: String,
    /// Topic the command was routed on.
    pub topic: String,
    /// Terminal state reached.
    pub state: CommandState,
    /// Outcome of the command (success, failed, timeout, late_ack).
    pub outcome: String,
    /// Enqueue-to-terminal latency in seconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnaround_secs: Option<f64>,
    /// Whether the result arrived after the command timed out.
    pub acked_late: bool,
    /// Additional context or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandAuditEvent {
    /// Build an audit record from a terminal status row.
    pub fn from_status(status: &CommandStatus) -> Self {
        let outcome = if status.acked_late {
            "late_ack".to_string()
        } else {
            status.state.as_str().to_string()
        };
        let severity = match (status.state, status.acked_late) {
            (CommandState::Success, false) => AuditSeverity::Info,
            _ => AuditSeverity::Warning,
        };
        let message = status
            .result
            .as_ref()
            .and_then(|result| result.error.clone());

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            severity,
            command_id: status.command_id.to_string(),
            cluster_id: status.cluster_id.clone(),
            topic: status.topic.as_str().to_string(),
            state: status.state,
            outcome,
            turnaround_secs: status.turnaround_secs(),
            acked_late: status.acked_late,
            message,
        }
    }

    /// Set the message.
    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    /// Log the audit record.
    ///
    /// Logs as JSON for machine parsing under the `audit` target.
    pub fn log(&self) {
        let json = match serde_json::to_string(self) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        match self.severity {
            AuditSeverity::Info => {
                info!(
                    target: "audit",
                    command_id = %self.command_id,
                    cluster = %self.cluster_id,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
            AuditSeverity::Warning => {
                warn!(
                    target: "audit",
                    command_id = %self.command_id,
                    cluster = %self.cluster_id,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
        }
    }
}

/// Sink for terminal command records.
///
/// The bus reports every command that reaches a terminal state. Implement
/// this to ship records to an external audit store; the default sink writes
/// structured logs.
pub trait CommandAuditSink: Send + Sync {
    /// Called once per terminal transition, plus once more if a late ack
    /// attaches a result afterwards.
    fn on_terminal(&self, status: &CommandStatus);
}

/// Default sink that emits audit records to the `audit` log target.
#[derive(Debug, Default)]
pub struct LogAuditSink;

impl CommandAuditSink for LogAuditSink {
    fn on_terminal(&self, status: &CommandStatus) {
        CommandAuditEvent::from_status(status).log();
    }
}
