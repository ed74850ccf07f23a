//! In-memory sink for tests and single-process use
//!
//! Keeps a bounded history of published notifications and fans each one out
//! to broadcast subscribers.

use super::EventSink;
use crate::config::millis;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// A notification as seen by the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,
    /// Event name (e.g., "debug.stopped")
    pub name: String,
    pub payload: serde_json::Value,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl PublishedEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            payload,
            timestamp: now_millis(),
        }
    }
}

/// In-memory event sink
pub struct MemoryEventSink {
    events: Arc<RwLock<Vec<PublishedEvent>>>,
    max_events: usize,
    tx: broadcast::Sender<PublishedEvent>,
}

impl MemoryEventSink {
    /// Create a sink retaining at most `max_events` (0 = unbounded)
    pub fn new(max_events: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
            tx,
        }
    }

    /// Receive every notification published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    /// All retained notifications, oldest first
    pub async fn events(&self) -> Vec<PublishedEvent> {
        self.events.read().await.clone()
    }

    /// Retained notifications with the given name
    pub async fn events_named(&self, name: &str) -> Vec<PublishedEvent> {
        let events = self.events.read().await;
        events.iter().filter(|e| e.name == name).cloned().collect()
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, name: &str, payload: serde_json::Value) -> Result<()> {
        let event = PublishedEvent::new(name, payload);

        {
            let mut events = self.events.write().await;
            events.push(event.clone());

            if self.max_events > 0 && events.len() > self.max_events {
                let drain_count = events.len() - self.max_events;
                events.drain(..drain_count);
            }
        }

        // No subscribers is not an error
        let _ = self.tx.send(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn now_millis() -> u64 {
    millis(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_retains_and_broadcasts() {
        let sink = MemoryEventSink::default();
        let mut rx = sink.subscribe();

        sink.publish("debug.continued", serde_json::json!({"sessionId": "dbg-1"}))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert!(received.id.starts_with("evt-"));
        assert_eq!(received.name, "debug.continued");
        assert_eq!(received.payload["sessionId"], "dbg-1");

        assert_eq!(sink.events().await.len(), 1);
        assert_eq!(sink.events_named("debug.continued").await.len(), 1);
        assert!(sink.events_named("debug.stopped").await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let sink = MemoryEventSink::new(2);
        for i in 0..3 {
            sink.publish("debug.output", serde_json::json!({"n": i}))
                .await
                .unwrap();
        }

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["n"], 1);
        assert_eq!(events[1].payload["n"], 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let sink = MemoryEventSink::default();
        assert!(sink
            .publish("debug.terminated", serde_json::json!({}))
            .await
            .is_ok());
        assert_eq!(sink.name(), "memory");
    }
}
