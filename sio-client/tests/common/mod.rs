//! Shared test utilities for integration tests.
//!
//! `MockTransport` is a scripted in-memory transport. Each connection attempt
//! pops the next `ConnectOutcome`; a `TransportProbe` shared with the test
//! records what the manager sent and lets the test play the server side.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use sio_client::{
    ClientConfig, Frame, Packet, SioError, SioResult, Socket, Transport, TransportOptions,
    TransportSink, Value,
};

/// What the next connection attempt does.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// Report the transport open.
    Open,
    /// Report a connection error.
    Fail(String),
    /// Never report anything.
    Hang,
}

#[derive(Default)]
struct ProbeState {
    script: VecDeque<ConnectOutcome>,
    sink: Option<TransportSink>,
    sent: Vec<Frame>,
    connects: Vec<Instant>,
    disconnects: usize,
    last_options: Option<TransportOptions>,
    auto_join: bool,
    sessions: u32,
}

/// Test-side view of a `MockTransport`.
#[derive(Clone, Default)]
pub struct TransportProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl TransportProbe {
    /// A probe whose transport answers every namespace join with a session id.
    pub fn new() -> Self {
        let probe = Self::default();
        probe.state.lock().auto_join = true;
        probe
    }

    /// A probe that leaves namespace joins unanswered.
    pub fn manual() -> Self {
        Self::default()
    }

    /// Queue outcomes for upcoming connection attempts. Once the script runs
    /// out, attempts open.
    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.state.lock().script.extend(outcomes);
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(MockTransport {
            probe: self.clone(),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().connects.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn last_options(&self) -> Option<TransportOptions> {
        self.state.lock().last_options.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().sent.clone()
    }

    /// Names of the events sent on `namespace`, in order.
    pub fn sent_events(&self, namespace: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|f| f.namespace == namespace)
            .filter_map(|f| f.event_name().map(str::to_string))
            .collect()
    }

    /// Sink of the current connection, kept by tests that need to act as a
    /// stale transport later.
    pub fn current_sink(&self) -> Option<TransportSink> {
        self.state.lock().sink.clone()
    }

    /// Server side: deliver a frame on the current connection.
    pub fn server_frame(&self, frame: Frame) {
        if let Some(sink) = self.current_sink() {
            sink.frame(frame);
        }
    }

    /// Server side: report a heartbeat on the current connection.
    pub fn server_ping(&self) {
        if let Some(sink) = self.current_sink() {
            sink.ping();
        }
    }

    /// Server side: answer a heartbeat after `latency`.
    pub fn server_pong(&self, latency: Duration) {
        if let Some(sink) = self.current_sink() {
            sink.pong(latency);
        }
    }

    /// Server side: close the current connection.
    pub fn server_close(&self, reason: &str) {
        if let Some(sink) = self.state.lock().sink.take() {
            sink.close(reason);
        }
    }

    /// Server side: fail the current connection.
    pub fn server_error(&self, err: &str) {
        if let Some(sink) = self.state.lock().sink.take() {
            sink.error(err);
        }
    }
}

/// Scripted in-memory transport.
pub struct MockTransport {
    probe: TransportProbe,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        _url: &Url,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> SioResult<()> {
        let outcome = {
            let mut state = self.probe.state.lock();
            state.connects.push(Instant::now());
            state.last_options = Some(options.clone());
            state.script.pop_front().unwrap_or(ConnectOutcome::Open)
        };
        match outcome {
            ConnectOutcome::Open => {
                self.probe.state.lock().sink = Some(sink.clone());
                sink.open();
            }
            ConnectOutcome::Fail(err) => {
                sink.error(err);
            }
            ConnectOutcome::Hang => {
                self.probe.state.lock().sink = Some(sink);
            }
        }
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> SioResult<()> {
        let mut state = self.probe.state.lock();
        let Some(sink) = state.sink.clone() else {
            return Err(SioError::Transport("not connected".into()));
        };
        state.sent.push(frame.clone());

        if state.auto_join {
            if let Packet::Connect { .. } = frame.packet {
                state.sessions += 1;
                let sid = format!("sid-{}", state.sessions);
                sink.frame(Frame::connect(
                    frame.namespace,
                    Some(Value::from(json!({ "sid": sid }))),
                ));
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> SioResult<()> {
        let mut state = self.probe.state.lock();
        state.disconnects += 1;
        state.sink = None;
        Ok(())
    }
}

/// A config with short, deterministic timings.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        reconnection_delay_ms: 100,
        reconnection_delay_max_ms: 1_000,
        randomization_factor: 0.0,
        timeout_ms: 5_000,
        ..ClientConfig::default()
    }
}

pub type EventLog = mpsc::UnboundedReceiver<(String, Vec<Value>)>;

/// Forward every occurrence of `events` on `socket` into a channel.
pub fn record(socket: &Socket, events: &[&str]) -> EventLog {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in events {
        let tx = tx.clone();
        socket.on(name, move |event| {
            let _ = tx.send((event.name().to_string(), event.args().to_vec()));
            Ok(())
        });
    }
    rx
}

/// Next recorded event. Fails the test if none arrives within a minute of
/// (possibly virtual) time.
pub async fn next_event(log: &mut EventLog) -> (String, Vec<Value>) {
    tokio::time::timeout(Duration::from_secs(60), log.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event log closed")
}

/// Skip recorded events until `name` arrives; returns its arguments.
pub async fn wait_event(log: &mut EventLog, name: &str) -> Vec<Value> {
    loop {
        let (event, args) = next_event(log).await;
        if event == name {
            return args;
        }
    }
}

/// Let the manager tasks run until `condition` holds, without advancing the
/// clock.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met");
}

/// Yield long enough for queued commands and dispatches to drain.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}
