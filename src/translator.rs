//! Event translator
//!
//! Turns protocol-native adapter events into bus notifications. Publication
//! is fire-and-forget: notifications are queued to a single forwarding task
//! per translator, so publication order follows occurrence order and a slow
//! or failing sink never stalls a session's reader.

use crate::protocol::{EventMessage, ExitedEventBody, OutputEventBody, StackFrame};
use crate::sink::EventSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Notification published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DebugEvent {
    /// The debuggee suspended
    #[serde(rename_all = "camelCase")]
    Stopped {
        session_id: String,
        file: Option<String>,
        line: Option<i64>,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<i64>,
    },
    /// The debuggee resumed
    #[serde(rename_all = "camelCase")]
    Continued { session_id: String },
    /// The session reached `stopped`
    #[serde(rename_all = "camelCase")]
    Terminated {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    /// Adapter or debuggee output
    #[serde(rename_all = "camelCase")]
    Output {
        session_id: String,
        category: String,
        output: String,
    },
}

impl DebugEvent {
    /// Bus event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped { .. } => "debug.stopped",
            Self::Continued { .. } => "debug.continued",
            Self::Terminated { .. } => "debug.terminated",
            Self::Output { .. } => "debug.output",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Stopped { session_id, .. }
            | Self::Continued { session_id }
            | Self::Terminated { session_id, .. }
            | Self::Output { session_id, .. } => session_id,
        }
    }

    /// Build a `Stopped` notification from the top frame of the stopped thread
    pub fn stopped(
        session_id: &str,
        reason: &str,
        thread_id: Option<i64>,
        top_frame: Option<&StackFrame>,
    ) -> Self {
        Self::Stopped {
            session_id: session_id.to_string(),
            file: top_frame
                .and_then(|f| f.source.as_ref())
                .and_then(|s| s.location())
                .map(str::to_string),
            line: top_frame.map(|f| f.line),
            reason: reason.to_string(),
            thread_id,
        }
    }
}

/// Translate adapter events that map directly onto a notification
///
/// `stopped` is not handled here: its location needs a stack query, which the
/// session performs before calling `DebugEvent::stopped`.
pub fn translate(session_id: &str, event: &EventMessage) -> Option<DebugEvent> {
    match event.event.as_str() {
        "continued" => Some(DebugEvent::Continued {
            session_id: session_id.to_string(),
        }),
        "terminated" => Some(DebugEvent::Terminated {
            session_id: session_id.to_string(),
            exit_code: None,
        }),
        "exited" => Some(DebugEvent::Terminated {
            session_id: session_id.to_string(),
            exit_code: event.body_as::<ExitedEventBody>().ok().map(|b| b.exit_code),
        }),
        "output" => {
            let body: OutputEventBody = event.body_as().ok()?;
            Some(DebugEvent::Output {
                session_id: session_id.to_string(),
                category: body.category.unwrap_or_else(|| "console".to_string()),
                output: body.output,
            })
        }
        _ => None,
    }
}

/// Forwards notifications to an `EventSink` without blocking the caller
#[derive(Clone)]
pub struct EventTranslator {
    tx: mpsc::UnboundedSender<DebugEvent>,
}

impl EventTranslator {
    /// Start a forwarding task on the current tokio runtime
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DebugEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let name = event.name();
                let payload = match serde_json::to_value(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(event = name, error = %e, "Failed to serialize debug event");
                        continue;
                    }
                };

                if let Err(e) = sink.publish(name, payload).await {
                    tracing::warn!(
                        event = name,
                        session_id = %event.session_id(),
                        sink = sink.name(),
                        error = %e,
                        "Failed to publish debug event"
                    );
                }
            }
        });

        Self { tx }
    }

    /// Queue a notification for publication
    pub fn publish(&self, event: DebugEvent) {
        tracing::debug!(
            event = event.name(),
            session_id = %event.session_id(),
            "Debug event queued"
        );
        if self.tx.send(event).is_err() {
            tracing::warn!("Debug event forwarder has shut down");
        }
    }
}
