use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use reflow_core::event::EventBus;
use reflow_core::types::LogEntry;

/// Event names that close a run.
pub const TERMINAL_EVENTS: &[&str] = &["workflow_complete", "workflow_error"];

/// Unique identifier of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append-only execution log of a single run.
///
/// Entries are kept in memory for the run result, mirrored to `tracing`,
/// and published on the event bus when one is attached.
#[derive(Clone, Default)]
pub struct RunLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    bus: Option<Arc<EventBus>>,
}

impl RunLog {
    pub fn new(bus: Option<Arc<EventBus>>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            bus,
        }
    }

    pub fn record(
        &self,
        event: &str,
        node_id: &str,
        iteration: usize,
        details: Map<String, Value>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            node_id: node_id.to_string(),
            iteration,
            details,
        };

        let fields = serde_json::Value::Object(entry.details.clone());
        debug!(event, node_id, iteration, details = %fields, "workflow event");

        if let Some(bus) = &self.bus {
            bus.publish(entry.clone());
        }
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Snapshot of all entries recorded so far, in order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a details map from `(key, value)` pairs.
pub fn details<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// JSONL execution-log streamer.
///
/// Subscribes to the EventBus and appends each [`LogEntry`] as one JSON line
/// to `{log_dir}/{workflow_id}/{timestamp}_{run_id}.jsonl`. Lines already
/// written survive a crash mid-run.
pub struct RunLogger {
    log_dir: PathBuf,
}

impl RunLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Subscribe now and stream entries in the background until
    /// cancellation or a terminal event.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        workflow_id: String,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, workflow_id, run_id, cancel))
    }

    async fn run(
        self,
        mut rx: tokio::sync::broadcast::Receiver<LogEntry>,
        workflow_id: String,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        let workflow_dir = self.log_dir.join(&workflow_id);
        if let Err(e) = tokio::fs::create_dir_all(&workflow_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = workflow_dir.join(format!("{}_{}.jsonl", timestamp, run_id));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(entry) => {
                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }

                            if TERMINAL_EVENTS.contains(&entry.event.as_str()) {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped entries");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }
}
