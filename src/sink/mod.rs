//! Bus sinks: the publish side of the external event bus
//!
//! The bridge only needs `publish(name, payload)`; delivery, fan-out and
//! persistence are the bus's concern. Back-ends implement `EventSink`.

use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod nats;

/// Publish contract of the external event bus
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one notification; no acknowledgement beyond acceptance
    async fn publish(&self, name: &str, payload: serde_json::Value) -> Result<()>;

    /// Sink name (e.g., "memory", "nats")
    fn name(&self) -> &str;
}
