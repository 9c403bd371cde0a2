//! Strongly-typed identifiers for Drover entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a command.
///
/// Generated by the producer when it wants to wait on the result later,
/// or by the bus at enqueue time. Serializes as a plain UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Create a new random command ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a command ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Create a command ID from a string (for testing/debugging).
    ///
    /// Returns `None` if the string is not a valid UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd_{}", self.0)
    }
}

/// A command topic.
///
/// Topics partition each cluster's command stream into independent FIFO
/// lanes, so slow operational commands never head-of-line block automation
/// traffic. The set is closed: agents subscribe to exactly these lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Operator-initiated commands (restarts, scaling, kubectl-style actions).
    Ops,
    /// Commands issued by the automation/AIOps engine.
    Ai,
}

impl Topic {
    /// Parse a topic from its wire form.
    ///
    /// Returns `None` for anything outside the recognized set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ops" => Some(Self::Ops),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }

    /// Get the wire form of the topic.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ops => "ops",
            Self::Ai => "ai",
        }
    }

    /// All recognized topics.
    #[must_use]
    pub const fn all() -> [Topic; 2] {
        [Self::Ops, Self::Ai]
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing key for a command: one cluster, one topic, one FIFO queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    /// Target cluster identifier.
    pub cluster_id: String,
    /// Command topic within the cluster.
    pub topic: Topic,
}

impl QueueKey {
    /// Create a new routing key.
    #[must_use]
    pub fn new(cluster_id: impl Into<String>, topic: Topic) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            topic,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.topic)
    }
}
