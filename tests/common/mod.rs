//! Scripted in-process debug adapter
//!
//! Speaks just enough of the protocol to drive a session through launch,
//! stops, stepping, introspection and teardown over `tokio::io::duplex`.

#![allow(dead_code)]

use a3s_debug::protocol::{EventMessage, ProtocolMessage, Request, Response};
use a3s_debug::sink::memory::{MemoryEventSink, PublishedEvent};
use a3s_debug::{
    AdapterConnection, AdapterLauncher, BridgeConfig, DapCodec, LaunchOptions, Result,
    SessionRegistry,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

pub const WAIT: Duration = Duration::from_secs(3);

/// Knobs for the fake adapter's behaviour
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Delay before acknowledging continue/next/stepIn/stepOut
    pub control_delay: Duration,
    /// Never answer this command
    pub hang_on: Option<&'static str>,
    /// Drop the connection when this command arrives
    pub close_on: Option<&'static str>,
    /// Reject `launch` with this message
    pub fail_launch: Option<&'static str>,
    /// On `continue`, end the debuggee with this exit code instead of stopping
    pub exit_on_continue: Option<i32>,
    /// Answer `stackTrace` after this delay, without holding up other requests
    pub stack_trace_delay: Duration,
    /// Answer this command with a frame whose body is not JSON
    pub malformed_on: Option<&'static str>,
}

/// A garbled frame: valid header, five bytes of non-JSON body
pub const MALFORMED_FRAME: &[u8] = b"Content-Length: 5\r\n\r\n{bad}";

/// Commands received by every fake spawned from one launcher
pub type CommandLog = Arc<Mutex<Vec<String>>>;

pub fn commands(log: &CommandLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

enum Outgoing {
    Message(ProtocolMessage),
    Raw(&'static [u8]),
}

/// Writes the fake's output in the order it was queued
async fn write_outgoing(
    mut out: FramedWrite<WriteHalf<DuplexStream>, DapCodec>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(item) = queue.recv().await {
        let written = match item {
            Outgoing::Message(message) => out.send(&message).await.is_ok(),
            Outgoing::Raw(bytes) => out.get_mut().write_all(bytes).await.is_ok(),
        };
        if !written {
            return;
        }
    }
}

struct FakeAdapter {
    out: mpsc::UnboundedSender<Outgoing>,
    seq: Arc<AtomicI64>,
}

impl FakeAdapter {
    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn push(&self, message: ProtocolMessage) {
        let _ = self.out.send(Outgoing::Message(message));
    }

    async fn respond(&mut self, request: &Request, body: Option<Value>) {
        let response = Response::success(self.next_seq(), request, body);
        self.push(ProtocolMessage::Response(response));
    }

    /// Answer from a separate task once `delay` has passed
    fn respond_later(&self, request: &Request, body: Option<Value>, delay: Duration) {
        let out = self.out.clone();
        let seq = Arc::clone(&self.seq);
        let request = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let seq = seq.fetch_add(1, Ordering::SeqCst) + 1;
            let response = Response::success(seq, &request, body);
            let _ = out.send(Outgoing::Message(ProtocolMessage::Response(response)));
        });
    }

    async fn reject(&mut self, request: &Request, message: &str) {
        let response = Response::error(self.next_seq(), request, message);
        self.push(ProtocolMessage::Response(response));
    }

    async fn event(&mut self, name: &str, body: Option<Value>) {
        let event = EventMessage::new(self.next_seq(), name, body);
        self.push(ProtocolMessage::Event(event));
    }

    async fn stopped(&mut self, reason: &str) {
        self.event("stopped", Some(json!({"reason": reason, "threadId": 1})))
            .await;
    }

    fn garble(&self) {
        let _ = self.out.send(Outgoing::Raw(MALFORMED_FRAME));
    }
}

fn frames() -> Vec<Value> {
    vec![
        json!({
            "id": 1000,
            "name": "fib",
            "source": {"name": "fib.py", "path": "fib.py"},
            "line": 10,
            "column": 5
        }),
        json!({
            "id": 1001,
            "name": "<module>",
            "source": {"name": "fib.py", "path": "fib.py"},
            "line": 20,
            "column": 1
        }),
    ]
}

/// Serve one session on `stream` until it closes or the script drops it
pub async fn run_fake_adapter(stream: DuplexStream, script: Script, log: CommandLog) {
    let (read, write) = tokio::io::split(stream);
    let mut requests = FramedRead::new(read, DapCodec::default());
    let (out, queue) = mpsc::unbounded_channel();
    tokio::spawn(write_outgoing(
        FramedWrite::new(write, DapCodec::default()),
        queue,
    ));
    let mut adapter = FakeAdapter {
        out,
        seq: Arc::new(AtomicI64::new(0)),
    };
    let mut stop_on_entry = false;

    while let Some(Ok(message)) = requests.next().await {
        let ProtocolMessage::Request(request) = message else {
            continue;
        };
        log.lock().unwrap().push(request.command.clone());

        if script.close_on == Some(request.command.as_str()) {
            return;
        }
        if script.hang_on == Some(request.command.as_str()) {
            continue;
        }
        if script.malformed_on == Some(request.command.as_str()) {
            adapter.garble();
            continue;
        }

        let args = request.arguments.clone().unwrap_or(Value::Null);
        match request.command.as_str() {
            "initialize" => {
                adapter
                    .respond(
                        &request,
                        Some(json!({
                            "supportsConfigurationDoneRequest": true,
                            "supportsTerminateRequest": true
                        })),
                    )
                    .await;
                adapter.event("initialized", None).await;
            }
            "launch" | "attach" => {
                if let Some(message) = script.fail_launch {
                    adapter.reject(&request, message).await;
                    continue;
                }
                stop_on_entry = args["stopOnEntry"].as_bool().unwrap_or(false);
                adapter
                    .event(
                        "output",
                        Some(json!({"category": "console", "output": "Debugger attached\n"})),
                    )
                    .await;
                adapter.respond(&request, None).await;
            }
            "setBreakpoints" => {
                let breakpoints: Vec<Value> = args["breakpoints"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .map(|(i, bp)| json!({"id": i + 1, "verified": true, "line": bp["line"]}))
                    .collect();
                adapter
                    .respond(&request, Some(json!({"breakpoints": breakpoints})))
                    .await;
            }
            "configurationDone" => {
                if stop_on_entry {
                    adapter.stopped("entry").await;
                }
                adapter.respond(&request, None).await;
            }
            "threads" => {
                adapter
                    .respond(
                        &request,
                        Some(json!({"threads": [{"id": 1, "name": "MainThread"}]})),
                    )
                    .await;
            }
            "stackTrace" => {
                let levels = args["levels"].as_u64().unwrap_or(0) as usize;
                let mut stack = frames();
                if levels > 0 {
                    stack.truncate(levels);
                }
                let body = Some(json!({"stackFrames": stack, "totalFrames": 2}));
                if script.stack_trace_delay.is_zero() {
                    adapter.respond(&request, body).await;
                } else {
                    adapter.respond_later(&request, body, script.stack_trace_delay);
                }
            }
            "scopes" => {
                adapter
                    .respond(
                        &request,
                        Some(json!({"scopes": [
                            {"name": "Locals", "variablesReference": 100, "expensive": false},
                            {"name": "Globals", "variablesReference": 200, "expensive": true}
                        ]})),
                    )
                    .await;
            }
            "variables" => {
                let variables = match args["variablesReference"].as_i64() {
                    Some(100) => json!([
                        {"name": "n", "value": "10", "type": "int", "variablesReference": 0},
                        {"name": "memo", "value": "{...}", "type": "dict", "variablesReference": 101}
                    ]),
                    Some(101) => json!([
                        {"name": "0", "value": "0", "type": "int", "variablesReference": 0}
                    ]),
                    _ => json!([]),
                };
                adapter
                    .respond(&request, Some(json!({"variables": variables})))
                    .await;
            }
            "evaluate" => {
                adapter
                    .respond(
                        &request,
                        Some(json!({"result": "55", "type": "int", "variablesReference": 0})),
                    )
                    .await;
            }
            "continue" | "next" | "stepIn" | "stepOut" => {
                tokio::time::sleep(script.control_delay).await;
                adapter
                    .respond(&request, Some(json!({"allThreadsContinued": true})))
                    .await;

                match (request.command.as_str(), script.exit_on_continue) {
                    ("continue", Some(code)) => {
                        adapter.event("exited", Some(json!({"exitCode": code}))).await;
                        adapter.event("terminated", None).await;
                    }
                    ("continue", None) => adapter.stopped("breakpoint").await,
                    _ => adapter.stopped("step").await,
                }
            }
            "pause" => {
                adapter.respond(&request, None).await;
                adapter.stopped("pause").await;
            }
            "terminate" => {
                adapter.respond(&request, None).await;
                adapter.event("terminated", None).await;
            }
            "disconnect" => {
                adapter.respond(&request, None).await;
                return;
            }
            _ => adapter.reject(&request, "unsupported").await,
        }
    }
}

/// Launcher that serves every session from a fresh fake adapter
pub struct ScriptedLauncher {
    script: Script,
    log: CommandLog,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> CommandLog {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl AdapterLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        _language: &str,
        _program: &str,
        _options: &LaunchOptions,
    ) -> Result<AdapterConnection> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_fake_adapter(
            server,
            self.script.clone(),
            Arc::clone(&self.log),
        ));

        let mut connection = AdapterConnection::from_stream(client);
        connection.pid = Some(4242);
        Ok(connection)
    }
}

pub struct Harness {
    pub registry: SessionRegistry,
    pub sink: Arc<MemoryEventSink>,
    pub log: CommandLog,
}

pub fn harness(script: Script) -> Harness {
    harness_with_config(script, BridgeConfig::default())
}

pub fn harness_with_config(script: Script, config: BridgeConfig) -> Harness {
    let launcher = ScriptedLauncher::new(script);
    let log = launcher.log();
    let sink = Arc::new(MemoryEventSink::default());
    Harness {
        registry: SessionRegistry::new(config, Arc::new(launcher), sink.clone()),
        sink,
        log,
    }
}

pub fn stop_on_entry() -> LaunchOptions {
    LaunchOptions {
        stop_on_entry: true,
        ..Default::default()
    }
}

/// Poll the sink until an event matching `pred` is retained
pub async fn wait_for_event<F>(sink: &MemoryEventSink, name: &str, pred: F) -> PublishedEvent
where
    F: Fn(&PublishedEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Some(event) = sink
            .events_named(name)
            .await
            .into_iter()
            .find(|e| pred(e))
        {
            return event;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no '{}' event within {:?}",
            name,
            WAIT
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Events retained for one session, in publication order
pub async fn session_events(sink: &MemoryEventSink, session_id: &str) -> Vec<PublishedEvent> {
    sink.events()
        .await
        .into_iter()
        .filter(|e| e.payload["sessionId"] == session_id)
        .collect()
}
