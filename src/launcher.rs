//! Adapter acquisition
//!
//! The registry obtains a connected byte stream to a debug adapter through an
//! `AdapterLauncher`. `CommandLauncher` spawns the adapter configured for a
//! language and talks to it over stdio or a local TCP socket.

use crate::codec::{BoxedReader, BoxedWriter};
use crate::config::{AdapterConfig, AdapterTransport, BridgeConfig, LaunchOptions};
use crate::error::{DebugError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// A connected adapter stream plus process metadata
pub struct AdapterConnection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    /// Spawned adapter process, killed when the session is released
    pub child: Option<Child>,
}

impl AdapterConnection {
    /// Wrap an already-connected duplex stream (no process metadata)
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            port: None,
            pid: None,
            child: None,
        }
    }
}

impl std::fmt::Debug for AdapterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConnection")
            .field("port", &self.port)
            .field("pid", &self.pid)
            .field("child", &self.child.is_some())
            .finish()
    }
}

/// Produces a connected adapter stream for a program
#[async_trait]
pub trait AdapterLauncher: Send + Sync {
    async fn launch(
        &self,
        language: &str,
        program: &str,
        options: &LaunchOptions,
    ) -> Result<AdapterConnection>;
}

/// Spawns the adapter command configured for each language
pub struct CommandLauncher {
    adapters: HashMap<String, AdapterConfig>,
}

impl CommandLauncher {
    pub fn new(adapters: HashMap<String, AdapterConfig>) -> Self {
        Self { adapters }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.adapters.clone())
    }

    fn spawn(&self, adapter: &AdapterConfig, piped: bool) -> Result<Child> {
        let mut cmd = Command::new(&adapter.command);
        cmd.args(&adapter.args)
            .envs(&adapter.env)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if piped {
            cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null()).stdout(Stdio::null());
        }

        let mut child = cmd.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let command = adapter.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(adapter = %command, "{}", line);
                }
            });
        }

        Ok(child)
    }
}

async fn connect_with_retry(host: &str, port: u16) -> Result<TcpStream> {
    let mut last_err = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
    Err(last_err
        .map(DebugError::Io)
        .unwrap_or_else(|| DebugError::Config(format!("Cannot connect to {}:{}", host, port))))
}

#[async_trait]
impl AdapterLauncher for CommandLauncher {
    async fn launch(
        &self,
        language: &str,
        program: &str,
        _options: &LaunchOptions,
    ) -> Result<AdapterConnection> {
        let adapter = self.adapters.get(language).ok_or_else(|| DebugError::LaunchFailed {
            language: language.to_string(),
            program: program.to_string(),
            reason: "no debug adapter configured for language".to_string(),
        })?;

        match &adapter.transport {
            AdapterTransport::Stdio => {
                let mut child = self.spawn(adapter, true)?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| DebugError::Config("Adapter has no stdin".to_string()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| DebugError::Config("Adapter has no stdout".to_string()))?;

                tracing::info!(language = %language, command = %adapter.command, pid = ?child.id(), "Spawned debug adapter");
                Ok(AdapterConnection {
                    reader: Box::pin(stdout),
                    writer: Box::pin(stdin),
                    port: None,
                    pid: child.id(),
                    child: Some(child),
                })
            }
            AdapterTransport::Tcp { host, port } => {
                // An empty command means the adapter is already listening
                let child = if adapter.command.is_empty() {
                    None
                } else {
                    Some(self.spawn(adapter, false)?)
                };
                let pid = child.as_ref().and_then(|c| c.id());

                let stream = connect_with_retry(host, *port).await?;
                let (reader, writer) = stream.into_split();

                tracing::info!(language = %language, host = %host, port = *port, "Connected to debug adapter");
                Ok(AdapterConnection {
                    reader: Box::pin(reader),
                    writer: Box::pin(writer),
                    port: Some(*port),
                    pid,
                    child,
                })
            }
        }
    }
}
