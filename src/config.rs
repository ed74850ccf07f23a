//! Bridge configuration
//!
//! `BridgeConfig` carries the timeouts, defaults and adapter commands used by
//! the registry. Every field has a default so a partial JSON file is valid.
//! Per-call options (`LaunchOptions`, `ControlOptions`) are fully enumerated.

use crate::error::{DebugError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the launcher reaches an adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AdapterTransport {
    /// Speak the protocol over the spawned process's stdin/stdout
    #[default]
    Stdio,
    /// Connect to an adapter already listening on a TCP socket
    Tcp { host: String, port: u16 },
}

/// Debug adapter configuration for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Command to start the adapter
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// `adapterID` sent in the initialize request
    pub adapter_id: String,
    /// Transport used to reach the adapter
    #[serde(default)]
    pub transport: AdapterTransport,
}

impl AdapterConfig {
    fn stdio(command: &str, args: &[&str], adapter_id: &str) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            adapter_id: adapter_id.to_string(),
            transport: AdapterTransport::Stdio,
        }
    }
}

/// Built-in debug adapter configurations
pub fn builtin_adapters() -> HashMap<String, AdapterConfig> {
    let mut adapters = HashMap::new();

    // Python - debugpy
    adapters.insert(
        "python".to_string(),
        AdapterConfig::stdio("python3", &["-m", "debugpy.adapter"], "debugpy"),
    );

    // Go - delve
    adapters.insert(
        "go".to_string(),
        AdapterConfig::stdio("dlv", &["dap"], "go"),
    );

    // JavaScript/TypeScript - js-debug
    adapters.insert(
        "javascript".to_string(),
        AdapterConfig::stdio("js-debug-adapter", &[], "pwa-node"),
    );

    // Native - lldb-dap
    for lang in ["rust", "c", "cpp"] {
        adapters.insert(
            lang.to_string(),
            AdapterConfig::stdio("lldb-dap", &[], "lldb-dap"),
        );
    }

    adapters
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_disconnect_timeout_ms() -> u64 {
    2_000
}

fn default_initialized_timeout_ms() -> u64 {
    10_000
}

fn default_thread_id() -> i64 {
    1
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_client_id() -> String {
    "a3s".to_string()
}

fn default_client_name() -> String {
    "A3S Code".to_string()
}

/// Configuration for the debug bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Bound on every request awaiting its response
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bound on the terminate/disconnect exchange during cleanup
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    /// Bound on waiting for the adapter's `initialized` event
    #[serde(default = "default_initialized_timeout_ms")]
    pub initialized_timeout_ms: u64,

    /// Thread used when the caller has no thread context
    #[serde(default = "default_thread_id")]
    pub default_thread_id: i64,

    /// Largest frame body accepted from an adapter
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// `clientID` sent in the initialize request
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// `clientName` sent in the initialize request
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Adapter commands keyed by language
    #[serde(default = "builtin_adapters")]
    pub adapters: HashMap<String, AdapterConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            initialized_timeout_ms: default_initialized_timeout_ms(),
            default_thread_id: default_thread_id(),
            max_message_bytes: default_max_message_bytes(),
            client_id: default_client_id(),
            client_name: default_client_name(),
            adapters: builtin_adapters(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DebugError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            DebugError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DebugError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            DebugError::Config(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn initialized_timeout(&self) -> Duration {
        Duration::from_millis(self.initialized_timeout_ms)
    }

    /// Find the adapter configured for a language
    pub fn adapter(&self, language: &str) -> Option<&AdapterConfig> {
        self.adapters.get(language)
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    /// Register or replace an adapter for a language
    pub fn with_adapter(mut self, language: impl Into<String>, adapter: AdapterConfig) -> Self {
        self.adapters.insert(language.into(), adapter);
        self
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Whether the adapter should start the debuggee or attach to a running one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    #[default]
    Launch,
    Attach,
}

impl LaunchMode {
    /// Protocol command that starts the session in this mode
    pub fn command(&self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Attach => "attach",
        }
    }
}

/// Breakpoints to install for one source file before the debuggee runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoints {
    pub path: PathBuf,
    pub lines: Vec<i64>,
}

/// Options for creating a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    #[serde(default)]
    pub request: LaunchMode,

    /// Process to attach to (attach mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Program arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory for the debuggee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment for the debuggee
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Suspend at the first line instead of running to a breakpoint
    #[serde(default)]
    pub stop_on_entry: bool,

    /// Breakpoints installed during the configuration phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakpoints: Vec<SourceBreakpoints>,
}

/// Options accepted by control commands (continue/step/pause)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
}

impl ControlOptions {
    pub fn thread(thread_id: i64) -> Self {
        Self {
            thread_id: Some(thread_id),
        }
    }

    /// Resolve the thread, falling back to the configured default
    pub fn thread_or(&self, default_thread_id: i64) -> i64 {
        self.thread_id.unwrap_or(default_thread_id)
    }
}
