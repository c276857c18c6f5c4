use crate::types::LogEntry;

/// Fan-out of a run's execution log.
///
/// The scheduler publishes each [`LogEntry`] the moment it is recorded, so
/// JSONL writers and progress displays follow a run live. Entries published
/// with no subscriber are dropped; the run keeps its own copy.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<LogEntry>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, entry: LogEntry) {
        // Ignore error if no receivers
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(event: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            event: event.to_string(),
            node_id: "A".to_string(),
            iteration: 1,
            details: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_entries() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(entry("node_started"));

        assert_eq!(first.recv().await.unwrap().event, "node_started");
        assert_eq!(second.recv().await.unwrap().event, "node_started");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        bus.publish(entry("node_started"));
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}
