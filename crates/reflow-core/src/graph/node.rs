use serde::{Deserialize, Serialize};

/// Which executor family runs a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A remote generative-completion call.
    Remote,
    /// Forwards its latest input unchanged.
    Passthrough,
    /// A deterministic in-process computation.
    Local,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Remote => "remote",
            NodeKind::Passthrough => "passthrough",
            NodeKind::Local => "local",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the workflow graph.
///
/// The configuration map is opaque to the scheduler; only the executor the
/// node resolves to interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    /// Keep every delivered input instead of clearing after each execution.
    #[serde(default)]
    pub retain_inputs: bool,
}

impl Node {
    /// Create a new node with an empty configuration.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            config: serde_json::Map::new(),
            description: None,
            retain_inputs: false,
        }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Remote)
    }

    pub fn passthrough(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Passthrough)
    }

    pub fn local(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Local)
    }

    /// Set a configuration value.
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Accumulate inputs across ticks.
    pub fn retaining_inputs(mut self) -> Self {
        self.retain_inputs = true;
        self
    }

    /// Configuration value as a string, if present and a string.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = Node::remote("analyst")
            .with_config("name", serde_json::json!("gpt-4o"))
            .with_description("Research Analyst")
            .retaining_inputs();

        assert_eq!(node.id, "analyst");
        assert_eq!(node.kind, NodeKind::Remote);
        assert_eq!(node.config_str("name"), Some("gpt-4o"));
        assert_eq!(node.description.as_deref(), Some("Research Analyst"));
        assert!(node.retain_inputs);
    }

    #[test]
    fn test_config_str_non_string() {
        let node = Node::local("calc").with_config("precision", serde_json::json!(2));
        assert_eq!(node.config_str("precision"), None);
        assert_eq!(node.config_str("missing"), None);
    }
}
