//! Command model: the unit of work dispatched to cluster agents.

use crate::types::{CommandId, QueueKey, Topic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A command addressed to one cluster agent.
///
/// The `action` and `payload` are opaque to the bus; only the routing key
/// (`cluster_id`, `topic`) and the `id` are interpreted. Command-shape
/// validation (which fields an action requires) happens upstream of the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique identifier for this command.
    pub id: CommandId,

    /// Target cluster.
    pub cluster_id: String,

    /// Topic lane within the cluster.
    pub topic: Topic,

    /// Verb executed by the agent (e.g. `restart_deployment`).
    pub action: String,

    /// Kind of the Kubernetes object the action targets, opaque to the bus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_kind: Option<String>,

    /// Namespace of the target object, opaque to the bus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Name of the target object, opaque to the bus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    /// Action arguments, opaque to the bus.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the command was created.
    pub created_at: DateTime<Utc>,

    /// Number of times this command has been delivered.
    ///
    /// Incremented on every pickup; redelivery in at-least-once mode reuses
    /// the same command value with a higher attempt.
    #[serde(default)]
    pub attempt: u32,

    /// Optional metadata for correlation, tracing, etc.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Command {
    /// Create a new command with a generated ID.
    pub fn new(cluster_id: impl Into<String>, topic: Topic, action: impl Into<String>) -> Self {
        Self {
            id: CommandId::new(),
            cluster_id: cluster_id.into(),
            topic,
            action: action.into(),
            target_kind: None,
            target_namespace: None,
            target_name: None,
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
            attempt: 0,
            metadata: HashMap::new(),
        }
    }

    /// Create a builder for more complex commands.
    pub fn builder(
        cluster_id: impl Into<String>,
        topic: Topic,
        action: impl Into<String>,
    ) -> CommandBuilder {
        CommandBuilder::new(cluster_id, topic, action)
    }

    /// The routing key this command is addressed to.
    #[must_use]
    pub fn key(&self) -> QueueKey {
        QueueKey::new(self.cluster_id.clone(), self.topic)
    }

    /// Increment the delivery attempt counter.
    pub fn increment_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}

/// Builder for creating commands.
pub struct CommandBuilder {
    cluster_id: String,
    topic: Topic,
    action: String,
    id: Option<CommandId>,
    target_kind: Option<String>,
    target_namespace: Option<String>,
    target_name: Option<String>,
    payload: serde_json::Value,
    metadata: HashMap<String, String>,
}

impl CommandBuilder {
    /// Create a new builder.
    pub fn new(cluster_id: impl Into<String>, topic: Topic, action: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            topic,
            action: action.into(),
            id: None,
            target_kind: None,
            target_namespace: None,
            target_name: None,
            payload: serde_json::Value::Null,
            metadata: HashMap::new(),
        }
    }

    /// Set a specific command ID (otherwise one is generated).
    pub fn id(mut self, id: CommandId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the object the action targets (e.g. `deployment`, `default`, `api`).
    pub fn target(
        mut self,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.target_kind = Some(kind.into());
        self.target_namespace = Some(namespace.into());
        self.target_name = Some(name.into());
        self
    }

    /// Set the payload from any serializable value.
    pub fn payload(mut self, payload: impl Serialize) -> Self {
        self.payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        self
    }

    /// Add metadata.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the command.
    pub fn build(self) -> Command {
        Command {
            id: self.id.unwrap_or_default(),
            cluster_id: self.cluster_id,
            topic: self.topic,
            action: self.action,
            target_kind: self.target_kind,
            target_namespace: self.target_namespace,
            target_name: self.target_name,
            payload: self.payload,
            created_at: Utc::now(),
            attempt: 0,
            metadata: self.metadata,
        }
    }
}

/// Terminal outcome of a command, posted back by the executing agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// The command this result belongs to.
    pub command_id: CommandId,

    /// Whether the agent executed the command successfully.
    pub success: bool,

    /// Agent output, opaque to the bus.
    #[serde(default)]
    pub output: serde_json::Value,

    /// Error message when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time reported by the agent, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_time_ms: Option<u64>,

    /// When the agent finished executing.
    pub finished_at: DateTime<Utc>,
}

impl CommandResult {
    /// Create a successful result.
    pub fn success(command_id: CommandId, output: serde_json::Value) -> Self {
        Self {
            command_id,
            success: true,
            output,
            error: None,
            exec_time_ms: None,
            finished_at: Utc::now(),
        }
    }

    /// Create a failed result.
    pub fn failure(command_id: CommandId, error: impl Into<String>) -> Self {
        Self {
            command_id,
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            exec_time_ms: None,
            finished_at: Utc::now(),
        }
    }

    /// Attach the agent-reported execution time.
    pub fn with_exec_time(mut self, exec_time_ms: u64) -> Self {
        self.exec_time_ms = Some(exec_time_ms);
        self
    }
}

/// Lifecycle state of a command.
///
/// Transitions are forward-only: `Pending -> Running -> terminal`, where
/// `Success`, `Failed`, and `Timeout` are terminal. The first terminal write
/// wins; no terminal state is ever overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Enqueued, not yet picked up by an agent.
    Pending,
    /// Delivered to an agent and executing.
    Running,
    /// Agent reported success.
    Success,
    /// Agent reported failure.
    Failed,
    /// No result arrived before the waiter's deadline.
    Timeout,
}

impl CommandState {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }

    /// Whether a transition to `next` moves the lifecycle forward.
    #[must_use]
    pub const fn can_transition(&self, next: CommandState) -> bool {
        self.rank() < next.rank()
    }

    /// The wire form of the state (used as a metrics label).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Failed | Self::Timeout => 2,
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row in the command status table.
///
/// The bus is the single source of truth for this row while the command is
/// in flight. A result that arrives after `Timeout` is recorded here with
/// `acked_late` set, without changing the terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStatus {
    /// The command this row tracks.
    pub command_id: CommandId,

    /// Target cluster (copied from the command for history/audit).
    pub cluster_id: String,

    /// Topic lane (copied from the command for history/audit).
    pub topic: Topic,

    /// Current lifecycle state.
    pub state: CommandState,

    /// Terminal result, once an agent posted one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,

    /// When the row was created (enqueue time).
    pub created_at: DateTime<Utc>,

    /// When the command was delivered to an agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the row reached its terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Whether the result arrived after the state was already `Timeout`.
    #[serde(default)]
    pub acked_late: bool,
}

impl CommandStatus {
    /// Create a `Pending` row for a command about to be enqueued.
    pub fn pending(command: &Command) -> Self {
        Self {
            command_id: command.id,
            cluster_id: command.cluster_id.clone(),
            topic: command.topic,
            state: CommandState::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            acked_late: false,
        }
    }

    /// Whether the row is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Enqueue-to-terminal turnaround, once finished.
    #[must_use]
    pub fn turnaround_secs(&self) -> Option<f64> {
        let finished = self.finished_at?;
        let micros = (finished - self.created_at).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }
}
