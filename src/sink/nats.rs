//! NATS sink
//!
//! Publishes each notification as JSON on core NATS subject
//! `<prefix>.<name>` (e.g., `events.debug.stopped`).

use super::EventSink;
use crate::error::{DebugError, Result};
use async_trait::async_trait;

/// NATS-backed event sink
pub struct NatsEventSink {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsEventSink {
    /// Connect to a NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        let client = async_nats::connect(url).await.map_err(|e| {
            DebugError::Config(format!("Failed to connect to NATS at {}: {}", url, e))
        })?;

        tracing::info!(url = %url, "Connected to NATS");
        Ok(Self::with_client(client, subject_prefix))
    }

    /// Wrap an existing connection
    pub fn with_client(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Subject a notification name is published to
    pub fn subject_for(&self, name: &str) -> String {
        subject_for(&self.subject_prefix, name)
    }
}

fn subject_for(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix.trim_end_matches('.'), name)
    }
}

#[async_trait]
impl EventSink for NatsEventSink {
    async fn publish(&self, name: &str, payload: serde_json::Value) -> Result<()> {
        let subject = self.subject_for(name);
        let bytes = serde_json::to_vec(&payload)?;

        self.client
            .publish(subject.clone(), bytes.into())
            .await
            .map_err(|e| DebugError::Publish {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(subject = %subject, "Debug event published to NATS");
        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for() {
        assert_eq!(subject_for("events", "debug.stopped"), "events.debug.stopped");
        assert_eq!(subject_for("events.", "debug.output"), "events.debug.output");
        assert_eq!(subject_for("", "debug.continued"), "debug.continued");
    }

    #[tokio::test]
    async fn test_connect_unreachable_server() {
        let result = NatsEventSink::connect("nats://127.0.0.1:1", "events").await;
        assert!(matches!(result, Err(DebugError::Config(_))));
    }
}
