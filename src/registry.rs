//! Session registry
//!
//! `SessionRegistry` is the sole owner of session lifetime: it acquires an
//! adapter through an `AdapterLauncher`, runs the handshake, stores the
//! session under a fresh `dbg-<uuid>` id and tears it down on `close`.
//!
//! Registries are plain values; tests create as many independent ones as
//! they need.

use crate::config::{BridgeConfig, ControlOptions, LaunchOptions};
use crate::error::{DebugError, Result};
use crate::launcher::{AdapterLauncher, CommandLauncher};
use crate::protocol::{Breakpoint, EvaluateResult, Scope, StackFrame, Thread, Variable};
use crate::session::{DebugSession, SessionInfo, SessionStatus};
use crate::sink::EventSink;
use crate::translator::EventTranslator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owns every debug session of one bridge instance
pub struct SessionRegistry {
    config: Arc<BridgeConfig>,
    launcher: Arc<dyn AdapterLauncher>,
    translator: EventTranslator,

    /// Live sessions (session_id → session)
    sessions: RwLock<HashMap<String, Arc<DebugSession>>>,
}

impl SessionRegistry {
    /// Create a registry publishing through `sink`
    ///
    /// Must be called inside a tokio runtime (the translator spawns its
    /// forwarding task).
    pub fn new(
        config: BridgeConfig,
        launcher: Arc<dyn AdapterLauncher>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            translator: EventTranslator::new(sink),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry that spawns the adapters listed in `config`
    pub fn with_command_launcher(config: BridgeConfig, sink: Arc<dyn EventSink>) -> Self {
        let launcher = Arc::new(CommandLauncher::from_config(&config));
        Self::new(config, launcher, sink)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Launch (or attach to) a debuggee and return the new session id
    pub async fn create(
        &self,
        language: &str,
        program: &str,
        options: LaunchOptions,
    ) -> Result<String> {
        let launch_failed = |reason: String| DebugError::LaunchFailed {
            language: language.to_string(),
            program: program.to_string(),
            reason,
        };

        let connection = self
            .launcher
            .launch(language, program, &options)
            .await
            .map_err(|e| match e {
                e @ DebugError::LaunchFailed { .. } => e,
                other => launch_failed(other.to_string()),
            })?;

        let id = format!("dbg-{}", uuid::Uuid::new_v4());
        let session = DebugSession::new(
            id.clone(),
            language,
            program,
            connection,
            Arc::clone(&self.config),
            self.translator.clone(),
        );

        let adapter_id = self
            .config
            .adapter(language)
            .map(|a| a.adapter_id.clone())
            .unwrap_or_else(|| language.to_string());

        if let Err(e) = session.start(&adapter_id, &options).await {
            tracing::warn!(
                session_id = %id,
                language = %language,
                program = %program,
                error = %e,
                "Debug session handshake failed"
            );
            session.disconnect().await;
            return Err(launch_failed(e.to_string()));
        }

        self.sessions.write().await.insert(id.clone(), session);

        tracing::info!(
            session_id = %id,
            language = %language,
            program = %program,
            "Debug session created"
        );
        Ok(id)
    }

    /// Look up a session
    pub async fn get(&self, id: &str) -> Result<Arc<DebugSession>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DebugError::NotFound(id.to_string()))
    }

    /// Disconnect and forget a session
    ///
    /// Unknown ids yield `NotFound`; concurrent closes of the same id tear
    /// the session down once.
    pub async fn close(&self, id: &str) -> Result<()> {
        let session = self.sessions.write().await.remove(id);
        let Some(session) = session else {
            return Err(DebugError::NotFound(id.to_string()));
        };

        session.disconnect().await;
        tracing::info!(session_id = %id, "Debug session closed");
        Ok(())
    }

    /// The `disconnect` endpoint: same teardown and result as
    /// [`SessionRegistry::close`]
    ///
    /// Callers treat `NotFound` as a soft outcome; the session is gone either
    /// way.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        self.close(id).await
    }

    /// Close every session (shutdown)
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<DebugSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        let count = drained.len();
        futures::future::join_all(drained.iter().map(|session| session.disconnect())).await;
        if count > 0 {
            tracing::info!(count, "Closed all debug sessions");
        }
        count
    }

    /// Remove sessions that already reached `stopped`
    pub async fn prune_stopped(&self) -> usize {
        let stopped: Vec<Arc<DebugSession>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.status() == SessionStatus::Stopped)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &stopped {
            session.disconnect().await;
            tracing::debug!(session_id = %session.id(), "Pruned stopped debug session");
        }
        stopped.len()
    }

    /// Metadata of every registered session, oldest first
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(|session| session.info())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    // ========================================================================
    // Pass-through operations by id
    // ========================================================================

    pub async fn status(&self, id: &str) -> Result<SessionInfo> {
        Ok(self.get(id).await?.info())
    }

    pub async fn continue_execution(&self, id: &str, options: ControlOptions) -> Result<()> {
        self.get(id).await?.continue_execution(options).await
    }

    pub async fn step_over(&self, id: &str, options: ControlOptions) -> Result<()> {
        self.get(id).await?.step_over(options).await
    }

    pub async fn step_into(&self, id: &str, options: ControlOptions) -> Result<()> {
        self.get(id).await?.step_into(options).await
    }

    pub async fn step_out(&self, id: &str, options: ControlOptions) -> Result<()> {
        self.get(id).await?.step_out(options).await
    }

    pub async fn pause(&self, id: &str, options: ControlOptions) -> Result<()> {
        self.get(id).await?.pause(options).await
    }

    pub async fn stack_trace(&self, id: &str, thread_id: Option<i64>) -> Result<Vec<StackFrame>> {
        self.get(id).await?.stack_trace(thread_id).await
    }

    pub async fn scopes(&self, id: &str, frame_id: i64) -> Result<Vec<Scope>> {
        self.get(id).await?.scopes(frame_id).await
    }

    pub async fn variables(&self, id: &str, variables_reference: i64) -> Result<Vec<Variable>> {
        self.get(id).await?.variables(variables_reference).await
    }

    pub async fn threads(&self, id: &str) -> Result<Vec<Thread>> {
        self.get(id).await?.threads().await
    }

    pub async fn set_breakpoints(
        &self,
        id: &str,
        path: &str,
        lines: &[i64],
    ) -> Result<Vec<Breakpoint>> {
        self.get(id).await?.set_breakpoints(path, lines).await
    }

    pub async fn evaluate(
        &self,
        id: &str,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<EvaluateResult> {
        self.get(id).await?.evaluate(expression, frame_id).await
    }
}
