//! # a3s-debug
//!
//! Debug Adapter Protocol bridge for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-debug` drives debuggers (debugpy, dlv, js-debug, lldb-dap, ...) over
//! the Debug Adapter Protocol on behalf of an agent. It owns session
//! lifecycle, correlates requests with responses, enforces a per-session
//! command discipline and republishes debugger events on an event bus.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_debug::{BridgeConfig, ControlOptions, LaunchOptions, SessionRegistry};
//! use a3s_debug::sink::memory::MemoryEventSink;
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_debug::Result<()> {
//! let sink = Arc::new(MemoryEventSink::default());
//! let registry = SessionRegistry::with_command_launcher(BridgeConfig::default(), sink);
//!
//! let options = LaunchOptions {
//!     stop_on_entry: true,
//!     ..Default::default()
//! };
//! let id = registry.create("python", "fib.py", options).await?;
//!
//! registry.continue_execution(&id, ControlOptions::default()).await?;
//! let frames = registry.stack_trace(&id, None).await?;
//! println!("Stopped in {}", frames[0].name);
//!
//! registry.close(&id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **DapCodec** — `Content-Length` framing as a tokio-util codec
//! - **PendingRequests** — sequence → waiter table, failed in bulk on teardown
//! - **DebugSession** — one adapter connection, its reader task and state machine
//! - **SessionRegistry** — creates, looks up and closes sessions
//! - **EventTranslator** — turns adapter events into `debug.*` bus notifications
//! - **EventSink** trait — bus back-end (in-memory or NATS)
//! - **AdapterLauncher** trait — how an adapter stream is obtained

pub mod codec;
pub mod config;
pub mod error;
pub mod launcher;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sink;
pub mod translator;

// Re-export core types
pub use codec::{DapCodec, WireSender};
pub use config::{
    builtin_adapters, AdapterConfig, AdapterTransport, BridgeConfig, ControlOptions, LaunchMode,
    LaunchOptions, SourceBreakpoints,
};
pub use error::{DebugError, Result};
pub use launcher::{AdapterConnection, AdapterLauncher, CommandLauncher};
pub use pending::PendingRequests;
pub use protocol::{
    Breakpoint, Capabilities, EvaluateResult, ProtocolMessage, Scope, StackFrame, Thread,
    Variable,
};
pub use registry::SessionRegistry;
pub use session::{DebugSession, SessionInfo, SessionStatus};
pub use sink::EventSink;
pub use translator::{DebugEvent, EventTranslator};

// Re-export sinks for convenience
pub use sink::memory::{MemoryEventSink, PublishedEvent};
pub use sink::nats::NatsEventSink;
