//! Session adapter
//!
//! A `DebugSession` drives one adapter connection. It owns the wire, the
//! pending-request table and the session state machine:
//!
//! ```text
//! initializing ──► running ◄──► paused
//!       │             │           │
//!       └─────────────┴───────────┴──► stopped
//! ```
//!
//! A background reader task consumes adapter messages: responses resolve
//! their waiters, events move the state machine and are forwarded to the
//! `EventTranslator`, reverse requests are rejected.
//!
//! Control commands (continue, step, pause) are exclusive; introspection
//! commands may overlap each other but not a control command. A conflicting
//! command fails fast with `BadState` instead of queueing.

use crate::codec::{wire, MessageStream, WireSender};
use crate::config::{millis, BridgeConfig, ControlOptions, LaunchOptions};
use crate::error::{DebugError, Result};
use crate::launcher::AdapterConnection;
use crate::pending::{PendingRequests, ResponseReceiver};
use crate::protocol::{
    Breakpoint, Capabilities, DisconnectArguments, EvaluateArguments, EvaluateResult,
    EventMessage, InitializeArguments, LaunchRequestArguments, ProtocolMessage, Request,
    Response, Scope, ScopesArguments, ScopesBody, SetBreakpointsArguments, SetBreakpointsBody,
    Source, SourceBreakpoint, StackFrame, StackTraceArguments, StackTraceBody, StoppedEventBody,
    Thread, ThreadArguments, ThreadsBody, Variable, VariablesArguments, VariablesBody,
};
use crate::translator::{translate, DebugEvent, EventTranslator};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{oneshot, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

/// Commands whose success response means the debuggee resumed
const RESUME_COMMANDS: [&str; 4] = ["continue", "next", "stepIn", "stepOut"];

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Running,
    Paused,
    Stopped,
}

impl SessionStatus {
    /// Whether `self → next` is an edge of the state graph
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Initializing | Running | Paused, Stopped)
        )
    }

    pub fn is_live(self) -> bool {
        self != SessionStatus::Stopped
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session's metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub language: String,
    pub program: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// One live debug session bound to one adapter connection
pub struct DebugSession {
    id: String,
    language: String,
    program: String,
    port: Option<u16>,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    config: Arc<BridgeConfig>,

    wire: WireSender,
    pending: PendingRequests,
    next_seq: AtomicI64,

    status: watch::Sender<SessionStatus>,
    /// Write = control command in flight, read = introspection in flight
    command_gate: RwLock<()>,
    capabilities: RwLock<Capabilities>,
    initialized: Notify,
    exit_code: std::sync::Mutex<Option<i32>>,
    /// Bumped whenever the debuggee leaves `paused`; a stop notification
    /// resolved under an older epoch is stale
    stop_epoch: std::sync::Mutex<u64>,

    /// Set once the handshake succeeded; gates the `Terminated` notification
    announced: AtomicBool,
    finished: AtomicBool,
    released: AtomicBool,
    reader_alive: AtomicBool,

    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    translator: EventTranslator,
}

impl DebugSession {
    /// Bind a session to an adapter connection and start its reader task
    ///
    /// The session starts in `initializing`; call [`DebugSession::start`] to
    /// run the launch handshake.
    pub fn new(
        id: impl Into<String>,
        language: &str,
        program: &str,
        connection: AdapterConnection,
        config: Arc<BridgeConfig>,
        translator: EventTranslator,
    ) -> Arc<Self> {
        let AdapterConnection {
            reader,
            writer,
            port,
            pid,
            child,
        } = connection;
        let (sender, stream) = wire(reader, writer, config.max_message_bytes);
        let (status, _) = watch::channel(SessionStatus::Initializing);

        let session = Arc::new(Self {
            id: id.into(),
            language: language.to_string(),
            program: program.to_string(),
            port,
            pid,
            created_at: Utc::now(),
            config,
            wire: sender,
            pending: PendingRequests::new(),
            next_seq: AtomicI64::new(1),
            status,
            command_gate: RwLock::new(()),
            capabilities: RwLock::new(Capabilities::default()),
            initialized: Notify::new(),
            exit_code: std::sync::Mutex::new(None),
            stop_epoch: std::sync::Mutex::new(0),
            announced: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            released: AtomicBool::new(false),
            reader_alive: AtomicBool::new(true),
            reader: std::sync::Mutex::new(None),
            child: Mutex::new(child),
            translator,
        });

        let handle = tokio::spawn(read_loop(Arc::downgrade(&session), stream));
        if let Ok(mut slot) = session.reader.lock() {
            *slot = Some(handle);
        }
        session
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Exit code reported by the adapter, once the debuggee exited
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.lock().ok().and_then(|code| *code)
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.capabilities.read().await.clone()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            language: self.language.clone(),
            program: self.program.clone(),
            status: self.status(),
            port: self.port,
            pid: self.pid,
            exit_code: self.exit_code(),
            created_at: self.created_at,
        }
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Wait until the session reaches `target` (or `stopped`)
    ///
    /// Returns the status that ended the wait.
    pub async fn wait_for_status(
        &self,
        target: SessionStatus,
        limit: Duration,
    ) -> Result<SessionStatus> {
        let mut rx = self.status.subscribe();
        let reached = tokio::time::timeout(
            limit,
            rx.wait_for(|s| *s == target || *s == SessionStatus::Stopped),
        )
        .await
        .map_err(|_| DebugError::Timeout {
            command: format!("wait for {}", target),
            millis: millis(limit),
        })?;

        match reached {
            Ok(status) => Ok(*status),
            Err(_) => Ok(self.status()),
        }
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Run the launch handshake
    ///
    /// `initialize` → `launch`/`attach` → wait for `initialized` → initial
    /// breakpoints → `configurationDone` → launch response. On success the
    /// session is `running` (or `paused` if the adapter already stopped).
    pub async fn start(&self, adapter_id: &str, options: &LaunchOptions) -> Result<()> {
        let init = InitializeArguments {
            client_id: self.config.client_id.clone(),
            client_name: self.config.client_name.clone(),
            adapter_id: adapter_id.to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: "path".to_string(),
            supports_variable_type: true,
        };
        let capabilities: Capabilities = self
            .request_body("initialize", Some(serde_json::to_value(&init)?))
            .await?;
        *self.capabilities.write().await = capabilities.clone();

        let command = options.request.command();
        let arguments = serde_json::to_value(self.launch_arguments(options))?;
        let (seq, mut launch_rx) = self.send_request(command, Some(arguments)).await?;

        // Some adapters answer launch before `initialized`, others only after
        // configurationDone.
        let initialized_timeout = self.config.initialized_timeout();
        let deadline = tokio::time::sleep(initialized_timeout);
        tokio::pin!(deadline);
        let mut launched = false;
        loop {
            tokio::select! {
                _ = self.initialized.notified() => break,
                delivered = &mut launch_rx, if !launched => {
                    settle(command, delivered)?;
                    launched = true;
                }
                _ = &mut deadline => {
                    self.pending.cancel(seq).await;
                    return Err(DebugError::Timeout {
                        command: "initialized".to_string(),
                        millis: millis(initialized_timeout),
                    });
                }
            }
        }

        for source in &options.breakpoints {
            let path = source.path.to_string_lossy();
            let verified = self.send_breakpoints(&path, &source.lines).await?;
            tracing::debug!(
                session_id = %self.id,
                path = %path,
                requested = source.lines.len(),
                verified = verified.iter().filter(|b| b.verified).count(),
                "Initial breakpoints set"
            );
        }

        if capabilities.supports_configuration_done_request {
            self.request("configurationDone", None).await?;
        }

        if !launched {
            self.await_response(seq, command, launch_rx, self.config.request_timeout())
                .await?;
        }

        // A stop during the handshake already moved the session past initializing
        self.transition_from(SessionStatus::Initializing, SessionStatus::Running);
        self.announced.store(true, Ordering::SeqCst);

        tracing::info!(
            session_id = %self.id,
            language = %self.language,
            program = %self.program,
            status = %self.status(),
            "Debug session started"
        );
        Ok(())
    }

    fn launch_arguments(&self, options: &LaunchOptions) -> LaunchRequestArguments {
        LaunchRequestArguments {
            program: self.program.clone(),
            args: options.args.clone(),
            cwd: options
                .cwd
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            env: options.env.clone(),
            stop_on_entry: options.stop_on_entry,
            process_id: options.pid,
        }
    }

    // ========================================================================
    // Control commands
    // ========================================================================

    /// Resume all threads (or the given one)
    pub async fn continue_execution(&self, options: ControlOptions) -> Result<()> {
        self.control("continue", options).await
    }

    pub async fn step_over(&self, options: ControlOptions) -> Result<()> {
        self.control("next", options).await
    }

    pub async fn step_into(&self, options: ControlOptions) -> Result<()> {
        self.control("stepIn", options).await
    }

    pub async fn step_out(&self, options: ControlOptions) -> Result<()> {
        self.control("stepOut", options).await
    }

    /// Ask a running debuggee to suspend
    ///
    /// The session turns `paused` when the adapter's stop event arrives,
    /// not when the request is acknowledged.
    pub async fn pause(&self, options: ControlOptions) -> Result<()> {
        self.ensure_live()?;
        let _gate = self
            .command_gate
            .try_write()
            .map_err(|_| DebugError::bad_state("pause", "another command is in flight"))?;
        self.require("pause", SessionStatus::Running)?;

        let arguments = ThreadArguments {
            thread_id: options.thread_or(self.config.default_thread_id),
        };
        self.request("pause", Some(serde_json::to_value(&arguments)?))
            .await?;
        Ok(())
    }

    /// Issue a resume-type command; the status turns `running` when the
    /// adapter acknowledges it
    async fn control(&self, command: &str, options: ControlOptions) -> Result<()> {
        self.ensure_live()?;
        let _gate = self
            .command_gate
            .try_write()
            .map_err(|_| DebugError::bad_state(command, "another command is in flight"))?;
        self.require(command, SessionStatus::Paused)?;

        let arguments = ThreadArguments {
            thread_id: options.thread_or(self.config.default_thread_id),
        };
        self.request(command, Some(serde_json::to_value(&arguments)?))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Introspection commands
    // ========================================================================

    /// Frames of a paused thread, innermost first
    pub async fn stack_trace(&self, thread_id: Option<i64>) -> Result<Vec<StackFrame>> {
        let arguments = StackTraceArguments {
            thread_id: thread_id.unwrap_or(self.config.default_thread_id),
            start_frame: None,
            levels: None,
        };
        let body: StackTraceBody = self
            .introspect("stackTrace", serde_json::to_value(&arguments)?)
            .await?;
        Ok(body.stack_frames)
    }

    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let body: ScopesBody = self
            .introspect(
                "scopes",
                serde_json::to_value(ScopesArguments { frame_id })?,
            )
            .await?;
        Ok(body.scopes)
    }

    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let body: VariablesBody = self
            .introspect(
                "variables",
                serde_json::to_value(VariablesArguments {
                    variables_reference,
                })?,
            )
            .await?;
        Ok(body.variables)
    }

    /// Evaluate an expression, optionally in the context of a frame
    pub async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<EvaluateResult> {
        let arguments = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: "repl".to_string(),
        };
        self.introspect("evaluate", serde_json::to_value(&arguments)?)
            .await
    }

    /// Threads of the debuggee; valid while running or paused
    pub async fn threads(&self) -> Result<Vec<Thread>> {
        self.ensure_live()?;
        let _gate = self
            .command_gate
            .try_read()
            .map_err(|_| DebugError::bad_state("threads", "a control command is in flight"))?;

        let body: ThreadsBody = self.request_body("threads", None).await?;
        Ok(body.threads)
    }

    /// Replace the breakpoints of one source file
    pub async fn set_breakpoints(&self, path: &str, lines: &[i64]) -> Result<Vec<Breakpoint>> {
        self.ensure_live()?;
        let _gate = self.command_gate.try_read().map_err(|_| {
            DebugError::bad_state("setBreakpoints", "a control command is in flight")
        })?;

        self.send_breakpoints(path, lines).await
    }

    async fn introspect<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: serde_json::Value,
    ) -> Result<T> {
        self.ensure_live()?;
        let _gate = self
            .command_gate
            .try_read()
            .map_err(|_| DebugError::bad_state(command, "a control command is in flight"))?;
        self.require(command, SessionStatus::Paused)?;

        self.request_body(command, Some(arguments)).await
    }

    async fn send_breakpoints(&self, path: &str, lines: &[i64]) -> Result<Vec<Breakpoint>> {
        let arguments = SetBreakpointsArguments {
            source: Source {
                name: Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                path: Some(path.to_string()),
            },
            breakpoints: lines
                .iter()
                .map(|&line| SourceBreakpoint { line })
                .collect(),
        };
        let body: SetBreakpointsBody = self
            .request_body("setBreakpoints", Some(serde_json::to_value(&arguments)?))
            .await?;
        Ok(body.breakpoints)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// End the session and release the adapter
    ///
    /// Sends `terminate` (when supported) and `disconnect` while the stream
    /// is still open, each bounded by the disconnect timeout; failures are
    /// ignored. Afterwards every pending waiter is failed, the wire is
    /// closed and the adapter process killed. Idempotent.
    pub async fn disconnect(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.reader_alive.load(Ordering::SeqCst) && !self.wire.is_closed().await {
            let limit = self.config.disconnect_timeout();
            let supports_terminate = self.capabilities.read().await.supports_terminate_request;

            if supports_terminate && self.status().is_live() {
                if let Err(e) = self.exchange("terminate", None, limit).await {
                    tracing::debug!(session_id = %self.id, error = %e, "terminate request failed");
                }
            }

            let arguments = serde_json::to_value(DisconnectArguments {
                terminate_debuggee: true,
            })
            .ok();
            if let Err(e) = self.exchange("disconnect", arguments, limit).await {
                tracing::debug!(session_id = %self.id, error = %e, "disconnect request failed");
            }
        }

        self.end("disconnected", |command| {
            DebugError::Terminated(format!("'{}' aborted: session disconnected", command))
        })
        .await;

        let reader = self.reader.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = reader {
            handle.abort();
        }
    }

    /// Move to `stopped` once, fail waiters, publish `Terminated`, then
    /// release the wire and the adapter process
    async fn end(&self, reason: &str, make_err: impl Fn(&str) -> DebugError) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            {
                let mut epoch = self.stop_epoch();
                *epoch += 1;
                self.status.send_if_modified(|status| {
                    if status.is_live() {
                        *status = SessionStatus::Stopped;
                        true
                    } else {
                        false
                    }
                });
            }

            let failed = self.pending.fail_all(make_err).await;
            let exit_code = self.exit_code();
            tracing::info!(
                session_id = %self.id,
                reason = reason,
                failed_requests = failed,
                exit_code = ?exit_code,
                "Debug session stopped"
            );

            if self.announced.load(Ordering::SeqCst) {
                self.translator.publish(DebugEvent::Terminated {
                    session_id: self.id.clone(),
                    exit_code,
                });
            }
        }

        self.wire.close().await;
        self.kill_child().await;
    }

    async fn kill_child(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(session_id = %self.id, error = %e, "Adapter process already gone");
            }
        }
    }

    // ========================================================================
    // Request plumbing
    // ========================================================================

    fn next_seq(&self) -> i64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.status().is_live() {
            Ok(())
        } else {
            Err(DebugError::NotFound(self.id.clone()))
        }
    }

    fn require(&self, command: &str, expected: SessionStatus) -> Result<()> {
        let status = self.status();
        if status == expected {
            Ok(())
        } else {
            Err(DebugError::bad_state(
                command,
                format!("session is {}, expected {}", status, expected),
            ))
        }
    }

    /// Apply a state-graph edge; returns false if the edge is not allowed
    fn transition(&self, next: SessionStatus) -> bool {
        let id = &self.id;
        self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                tracing::debug!(session_id = %id, from = %current, to = %next, "Session status changed");
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Apply `from → to` only if the session is currently in `from`
    fn transition_from(&self, from: SessionStatus, to: SessionStatus) -> bool {
        let id = &self.id;
        self.status.send_if_modified(|current| {
            if *current == from && from.can_transition_to(to) {
                tracing::debug!(session_id = %id, from = %from, to = %to, "Session status changed");
                *current = to;
                true
            } else {
                false
            }
        })
    }

    async fn send_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<(i64, ResponseReceiver)> {
        let seq = self.next_seq();
        let rx = self.pending.register(seq, command).await?;
        // Registered after teardown drained the table: nobody would resolve it
        if self.finished.load(Ordering::SeqCst) {
            self.pending.cancel(seq).await;
            return Err(DebugError::Terminated(format!(
                "'{}' not sent: session ended",
                command
            )));
        }

        let message = ProtocolMessage::Request(Request::new(seq, command, arguments));
        tracing::debug!(session_id = %self.id, seq, command, "Sending adapter request");
        if let Err(e) = self.wire.send(&message).await {
            self.pending.cancel(seq).await;
            return Err(e);
        }
        Ok((seq, rx))
    }

    async fn await_response(
        &self,
        seq: i64,
        command: &str,
        mut rx: ResponseReceiver,
        limit: Duration,
    ) -> Result<Response> {
        match tokio::time::timeout(limit, &mut rx).await {
            Ok(delivered) => settle(command, delivered),
            Err(_) if self.pending.cancel(seq).await => Err(DebugError::Timeout {
                command: command.to_string(),
                millis: millis(limit),
            }),
            // The reader claimed the response as the bound elapsed
            Err(_) => settle(command, rx.await),
        }
    }

    /// Send and wait, without ending the session on timeout
    async fn exchange(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
        limit: Duration,
    ) -> Result<Response> {
        let (seq, rx) = self.send_request(command, arguments).await?;
        self.await_response(seq, command, rx, limit).await
    }

    /// Send and wait; a timeout ends the session
    async fn request(&self, command: &str, arguments: Option<serde_json::Value>) -> Result<Response> {
        let result = self
            .exchange(command, arguments, self.config.request_timeout())
            .await;

        if let Err(DebugError::Timeout { millis, .. }) = &result {
            tracing::error!(
                session_id = %self.id,
                command,
                millis = *millis,
                "Adapter did not answer; ending session"
            );
            self.end("request timed out", |pending| {
                DebugError::Terminated(format!("'{}' aborted: session timed out", pending))
            })
            .await;
        }
        result
    }

    async fn request_body<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<T> {
        let response = self.request(command, arguments).await?;
        decode_body(command, response.body)
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    async fn dispatch(self: &Arc<Self>, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Response(response) => {
                let request_seq = response.request_seq;
                // Apply the resume before waking the issuer, so the issuer
                // never observes a stale `paused`.
                let claimed = self
                    .pending
                    .resolve_with(response, |command, response| {
                        if response.success && RESUME_COMMANDS.contains(&command) {
                            self.resumed();
                        }
                    })
                    .await;
                if claimed.is_none() {
                    tracing::debug!(session_id = %self.id, request_seq, "Dropping unmatched response");
                }
            }
            ProtocolMessage::Event(event) => self.handle_event(event).await,
            ProtocolMessage::Request(request) => self.reject_reverse_request(request).await,
        }
    }

    async fn handle_event(self: &Arc<Self>, event: EventMessage) {
        tracing::debug!(session_id = %self.id, event = %event.event, "Adapter event");

        match event.event.as_str() {
            "initialized" => self.initialized.notify_one(),
            "stopped" => {
                let body = event
                    .body_as::<StoppedEventBody>()
                    .unwrap_or_else(|e| {
                        tracing::warn!(session_id = %self.id, error = %e, "Malformed stopped event");
                        StoppedEventBody {
                            reason: "unknown".to_string(),
                            thread_id: None,
                            description: None,
                        }
                    });

                let epoch = {
                    let epoch = self.stop_epoch();
                    self.transition_from(SessionStatus::Initializing, SessionStatus::Running);
                    self.transition(SessionStatus::Paused);
                    let current = *epoch;
                    current
                };

                let session = Arc::clone(self);
                tokio::spawn(async move { session.announce_stop(body, epoch).await });
            }
            "continued" => self.resumed(),
            "exited" | "terminated" => {
                if let Some(DebugEvent::Terminated {
                    exit_code: Some(code),
                    ..
                }) = translate(&self.id, &event)
                {
                    if let Ok(mut slot) = self.exit_code.lock() {
                        *slot = Some(code);
                    }
                }

                let reason = format!("adapter sent '{}'", event.event);
                self.end(&reason, |command| {
                    DebugError::Terminated(format!("'{}' aborted: debuggee ended", command))
                })
                .await;
            }
            "output" => {
                if let Some(notification) = translate(&self.id, &event) {
                    self.translator.publish(notification);
                }
            }
            _ => {}
        }
    }

    fn stop_epoch(&self) -> MutexGuard<'_, u64> {
        self.stop_epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resumed(&self) {
        let mut epoch = self.stop_epoch();
        if self.transition(SessionStatus::Running) {
            *epoch += 1;
            self.translator.publish(DebugEvent::Continued {
                session_id: self.id.clone(),
            });
        }
    }

    /// Resolve the stop location, then publish `Stopped`
    ///
    /// Dropped if the debuggee left `paused` while the location was being
    /// resolved, so `Stopped` never follows the `Continued` that ended it.
    async fn announce_stop(&self, body: StoppedEventBody, epoch: u64) {
        let thread_id = body.thread_id.unwrap_or(self.config.default_thread_id);
        let top_frame = match self.top_frame(thread_id).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "Stop location unavailable");
                None
            }
        };

        let notification =
            DebugEvent::stopped(&self.id, &body.reason, body.thread_id, top_frame.as_ref());
        if !self.publish_stop(epoch, notification) {
            tracing::debug!(
                session_id = %self.id,
                reason = %body.reason,
                "Session left paused before its stop was announced"
            );
        }
    }

    /// Publish a stop notification unless the session moved on since `epoch`
    fn publish_stop(&self, epoch: u64, notification: DebugEvent) -> bool {
        let current = self.stop_epoch();
        if *current != epoch || self.status() != SessionStatus::Paused {
            return false;
        }
        self.translator.publish(notification);
        true
    }

    async fn top_frame(&self, thread_id: i64) -> Result<Option<StackFrame>> {
        let arguments = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: Some(1),
        };
        let body: StackTraceBody = self
            .request_body("stackTrace", Some(serde_json::to_value(&arguments)?))
            .await?;
        Ok(body.stack_frames.into_iter().next())
    }

    async fn reject_reverse_request(&self, request: Request) {
        tracing::debug!(
            session_id = %self.id,
            command = %request.command,
            "Rejecting reverse request"
        );
        let response = Response::error(
            self.next_seq(),
            &request,
            format!("'{}' is not supported", request.command),
        );
        if let Err(e) = self.wire.send(&ProtocolMessage::Response(response)).await {
            tracing::debug!(session_id = %self.id, error = %e, "Failed to answer reverse request");
        }
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("program", &self.program)
            .field("status", &self.status())
            .finish()
    }
}

/// Consume adapter messages until the stream ends
///
/// Holds only a weak handle between messages, so a dropped session stops
/// the loop at the next message.
async fn read_loop(handle: Weak<DebugSession>, mut stream: MessageStream) {
    let (session, outcome) = loop {
        let item = stream.next().await;
        let Some(session) = handle.upgrade() else {
            return;
        };
        match item {
            Some(Ok(message)) => session.dispatch(message).await,
            Some(Err(e)) => break (session, Some(e)),
            None => break (session, None),
        }
    };

    session.reader_alive.store(false, Ordering::SeqCst);
    match outcome {
        Some(DebugError::Protocol(reason)) => {
            tracing::error!(session_id = %session.id, error = %reason, "Malformed adapter message");
            let message = reason.clone();
            session
                .end(&reason, move |_| DebugError::Protocol(message.clone()))
                .await;
        }
        Some(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "Adapter stream failed");
            let reason = e.to_string();
            session
                .end(&reason, |command| {
                    DebugError::Terminated(format!("'{}' aborted: adapter stream failed", command))
                })
                .await;
        }
        None => {
            session
                .end("adapter stream closed", |command| {
                    DebugError::Terminated(format!("'{}' aborted: adapter stream closed", command))
                })
                .await;
        }
    }
}

fn settle(
    command: &str,
    delivered: std::result::Result<Result<Response>, oneshot::error::RecvError>,
) -> Result<Response> {
    let response = delivered
        .map_err(|_| DebugError::Terminated(format!("'{}' abandoned", command)))??;

    if response.success {
        Ok(response)
    } else {
        Err(DebugError::Adapter {
            command: command.to_string(),
            message: response
                .message
                .unwrap_or_else(|| "request failed".to_string()),
        })
    }
}

fn decode_body<T: DeserializeOwned>(command: &str, body: Option<serde_json::Value>) -> Result<T> {
    let body = body.unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    serde_json::from_value(body).map_err(|e| DebugError::Adapter {
        command: command.to_string(),
        message: format!("invalid response body: {}", e),
    })
}
