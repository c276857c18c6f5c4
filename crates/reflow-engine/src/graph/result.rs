use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reflow_core::error::Result;
use reflow_core::types::{LogEntry, Message};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// An end node produced output, or nothing was left to run.
    Completed,
    /// Stopped at the iteration bound.
    Exhausted,
    /// An executor broke its contract and the run was aborted.
    Failed,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Exhausted => "exhausted",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of executing an entire workflow.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub workflow_id: String,
    pub status: RunStatus,
    pub success: bool,
    /// Ticks actually executed.
    pub iterations: usize,
    pub final_output: Option<Message>,
    /// Every output of every node that ran, oldest first.
    pub node_outputs: BTreeMap<String, Vec<Message>>,
    /// Per-node execution counts, including nodes that never ran.
    pub execution_counts: BTreeMap<String, usize>,
    pub execution_log: Vec<LogEntry>,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl RunResult {
    pub fn execution_count(&self, node_id: &str) -> usize {
        self.execution_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn final_content(&self) -> Option<&str> {
        self.final_output.as_ref().map(|m| m.content.as_str())
    }

    /// Serializable document form of this result.
    pub fn to_document(&self) -> RunDocument {
        RunDocument {
            workflow_id: self.workflow_id.clone(),
            executed_at: self.executed_at,
            iterations: self.iterations,
            status: self.status,
            success: self.success,
            error: self.error.clone(),
            final_output: self.final_output.clone(),
            node_outputs: self.node_outputs.clone(),
            execution_log: self.execution_log.clone(),
            elapsed_secs: self.elapsed.as_secs_f64(),
        }
    }

    /// Write `<workflow_id>_workflow_result.json` under `dir`.
    pub fn save_results(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_workflow_result.json", self.workflow_id));
        let json = serde_json::to_string_pretty(&self.to_document())?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// Persisted run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDocument {
    pub workflow_id: String,
    pub executed_at: DateTime<Utc>,
    pub iterations: usize,
    pub status: RunStatus,
    pub success: bool,
    pub error: Option<String>,
    pub final_output: Option<Message>,
    pub node_outputs: BTreeMap<String, Vec<Message>>,
    pub execution_log: Vec<LogEntry>,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunResult {
        let mut node_outputs = BTreeMap::new();
        node_outputs.insert("a".to_string(), vec![Message::assistant("A:hi", "a")]);
        RunResult {
            workflow_id: "demo".into(),
            status: RunStatus::Completed,
            success: true,
            iterations: 1,
            final_output: Some(Message::assistant("A:hi", "a")),
            node_outputs,
            execution_counts: [("a".to_string(), 1), ("b".to_string(), 0)].into(),
            execution_log: vec![],
            elapsed: Duration::from_millis(1500),
            error: None,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_success() {
        assert!(RunStatus::Completed.is_success());
        assert!(RunStatus::Exhausted.is_success());
        assert!(!RunStatus::Failed.is_success());
        assert_eq!(RunStatus::Exhausted.to_string(), "exhausted");
    }

    #[test]
    fn test_accessors() {
        let result = sample();
        assert_eq!(result.execution_count("a"), 1);
        assert_eq!(result.execution_count("b"), 0);
        assert_eq!(result.execution_count("missing"), 0);
        assert_eq!(result.final_content(), Some("A:hi"));
    }

    #[test]
    fn test_save_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample().save_results(&dir.path().join("out")).unwrap();
        assert!(path.ends_with("demo_workflow_result.json"));

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["workflow_id"], "demo");
        assert_eq!(doc["status"], "completed");
        assert_eq!(doc["success"], true);
        assert_eq!(doc["iterations"], 1);
        assert_eq!(doc["elapsed_secs"], 1.5);
        assert_eq!(doc["final_output"]["content"], "A:hi");
        assert_eq!(doc["node_outputs"]["a"][0]["source"], "a");
        assert!(doc["error"].is_null());
    }
}
