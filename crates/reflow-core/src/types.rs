use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key flagging a message as a failed node output.
pub const META_IS_ERROR: &str = "is_error";
/// Metadata key recording which edge delivered a message.
pub const META_FROM_EDGE: &str = "from_edge";

/// Role of a message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

/// A message passed between nodes.
///
/// Messages are never mutated after construction; edge delivery builds a
/// fresh copy through [`Message::routed`] so every node keeps its own history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: serde_json::Map::new(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(Role::User, content, source)
    }

    pub fn assistant(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, source)
    }

    /// An assistant message carrying the error flag.
    pub fn error(
        content: impl Into<String>,
        source: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::assistant(content, source)
            .with_metadata("error", serde_json::Value::String(cause.into()))
            .with_metadata(META_IS_ERROR, serde_json::Value::Bool(true))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the metadata carries an explicit error flag.
    pub fn is_error_flagged(&self) -> bool {
        self.metadata
            .get(META_IS_ERROR)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Build the copy delivered along the edge `from -> to`.
    pub fn routed(&self, from: &str, to: &str) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            META_FROM_EDGE.to_string(),
            serde_json::Value::String(format!("{}->{}", from, to)),
        );
        Self {
            role: self.role,
            content: self.content.clone(),
            metadata,
            source: from.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Metadata value as a string, if present and a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// One entry of the structured execution log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub node_id: String,
    pub iteration: usize,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Read-only view handed to executors alongside their pending inputs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Latest output content per node, keyed by node id and by description.
    pub prior_outputs: Arc<HashMap<String, String>>,
    /// Caller-supplied values shared by every executor in the run.
    pub shared: Arc<HashMap<String, serde_json::Value>>,
}

impl ExecutionContext {
    pub fn prior_output(&self, key: &str) -> Option<&str> {
        self.prior_outputs.get(key).map(|s| s.as_str())
    }

    pub fn shared_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.shared.get(key)
    }
}
