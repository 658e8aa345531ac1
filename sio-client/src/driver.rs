//! The manager's I/O task.
//!
//! Owns the transport exclusively. Application calls reach it as `Command`s
//! and the transport reports through epoch-tagged `TransportEvent`s. Connect
//! timeout, heartbeat and reconnect timing all live in its select loop, so
//! closing the manager cancels them by construction.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use sio_core::config::{BufferPolicy, ClientConfig};
use sio_core::constants::{events, reasons};
use sio_core::error::AckError;

use crate::ack::AckResponder;
use crate::backoff::Backoff;
use crate::buffer::{BufferedEmit, EmitBuffer};
use crate::dispatch::{DispatchJob, DispatchTx};
use crate::events::Event;
use crate::manager::ManagerStatus;
use crate::packet::{AckId, Frame, Packet};
use crate::socket::{SocketShared, SocketStatus};
use crate::transport::{Transport, TransportEvent, TransportOptions, TransportSink};
use crate::value::Value;

/// Requests from manager and socket handles to the I/O task.
#[derive(Debug)]
pub(crate) enum Command {
    Open,
    Close,
    Join(String),
    Leave { namespace: String, was_connected: bool },
    Emit { frame: Frame, ack: Option<AckId> },
    AckReply { frame: Frame },
    Shutdown,
}

pub(crate) type CommandTx = mpsc::UnboundedSender<Command>;

pub(crate) type SocketMap = Arc<Mutex<BTreeMap<String, Arc<SocketShared>>>>;

type EventTx = mpsc::UnboundedSender<(u64, TransportEvent)>;
type EventRx = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

pub(crate) struct Driver {
    url: Url,
    config: ClientConfig,
    transport: Box<dyn Transport>,
    backoff: Box<dyn Backoff>,
    sockets: SocketMap,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Handed to `AckResponder`s for server-requested acks.
    commands_tx: CommandTx,
    events_tx: EventTx,
    events_rx: EventRx,
    dispatch: DispatchTx,
    state_tx: watch::Sender<ManagerStatus>,
    status: ManagerStatus,
    /// Connection attempt counter. Transport events from older attempts are
    /// discarded.
    epoch: u64,
    /// Reconnect attempts since the last successful open.
    attempts: u32,
    /// Set by an explicit close; suppresses reconnection until the next open.
    skip_reconnect: bool,
    /// A transport connect is in flight.
    opening: bool,
    connect_deadline: Option<Instant>,
    /// Pushed back by every inbound frame and heartbeat while connected.
    heartbeat_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    /// Namespaces a join was sent for on the current connection.
    joined: HashSet<String>,
    buffer: EmitBuffer,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: Url,
        config: ClientConfig,
        transport: Box<dyn Transport>,
        backoff: Box<dyn Backoff>,
        sockets: SocketMap,
        commands: mpsc::UnboundedReceiver<Command>,
        commands_tx: CommandTx,
        dispatch: DispatchTx,
        state_tx: watch::Sender<ManagerStatus>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cap = match config.buffer {
            BufferPolicy::BufferUntilReconnect { cap } => cap,
            BufferPolicy::DropWhenDisconnected => 1,
        };
        Self {
            url,
            config,
            transport,
            backoff,
            sockets,
            commands,
            commands_tx,
            events_tx,
            events_rx,
            dispatch,
            state_tx,
            status: ManagerStatus::Disconnected,
            epoch: 0,
            attempts: 0,
            skip_reconnect: false,
            opening: false,
            connect_deadline: None,
            heartbeat_deadline: None,
            reconnect_at: None,
            joined: HashSet::new(),
            buffer: EmitBuffer::new(cap),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("manager task started for {}", self.url);
        loop {
            // Transport events go first so queued commands act on the current
            // connection state, then commands, then timers.
            tokio::select! {
                biased;

                Some((epoch, event)) = self.events_rx.recv() => {
                    if epoch == self.epoch {
                        self.handle_transport_event(event).await;
                    } else {
                        debug!("ignoring stale transport event from attempt {epoch}");
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.close_all().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                _ = wait_until(self.connect_deadline) => {
                    self.connect_deadline = None;
                    self.on_connect_timeout().await;
                }
                _ = wait_until(self.heartbeat_deadline) => {
                    self.heartbeat_deadline = None;
                    self.on_heartbeat_timeout().await;
                }
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.attempt_reconnect().await;
                }
            }
        }
        debug!("manager task stopped for {}", self.url);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open => {
                self.skip_reconnect = false;
                if self.status == ManagerStatus::Reconnecting {
                    debug!("reconnect already scheduled, skipping open");
                    return;
                }
                self.open_transport().await;
            }
            Command::Close => self.close_all().await,
            Command::Join(namespace) => self.handle_join(namespace).await,
            Command::Leave {
                namespace,
                was_connected,
            } => self.handle_leave(namespace, was_connected).await,
            Command::Emit { frame, ack } => self.handle_emit(frame, ack).await,
            Command::AckReply { frame } => {
                if self.status == ManagerStatus::Connected {
                    self.send_frame(frame).await;
                } else {
                    debug!("dropping ack reply on {}, not connected", frame.namespace);
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_join(&mut self, namespace: String) {
        let Some(socket) = self.socket(&namespace) else {
            return;
        };
        if socket.status() != SocketStatus::Connecting {
            return;
        }
        match self.status {
            ManagerStatus::Connected => self.send_join(&socket).await,
            ManagerStatus::Disconnected | ManagerStatus::Disconnecting => {
                self.skip_reconnect = false;
                self.open_transport().await;
            }
            // Joined once the pending attempt opens.
            ManagerStatus::Connecting | ManagerStatus::Reconnecting => {}
        }
    }

    async fn handle_leave(&mut self, namespace: String, was_connected: bool) {
        self.joined.remove(&namespace);
        self.discard_buffered(Some(&namespace));

        if let Some(socket) = self.socket(&namespace) {
            if was_connected {
                if self.status == ManagerStatus::Connected {
                    self.send_frame(Frame::disconnect(namespace.clone())).await;
                }
                info!("socket {} disconnected: {}", namespace, reasons::CLIENT_DISCONNECT);
                self.dispatch(&socket, events::DISCONNECT, vec![reasons::CLIENT_DISCONNECT.into()]);
            }
        }
        self.close_if_idle().await;
    }

    async fn handle_emit(&mut self, frame: Frame, ack: Option<AckId>) {
        let Some(socket) = self.socket(&frame.namespace) else {
            warn!("dropping emit for unknown namespace {}", frame.namespace);
            return;
        };
        if let Some(id) = ack {
            // An emit whose ack already settled is never sent.
            if !socket.acks.lock().is_pending(id) {
                debug!("dropping emit on {}, ack {} already settled", frame.namespace, id);
                return;
            }
        }

        if self.status == ManagerStatus::Connected && socket.status() == SocketStatus::Connected {
            if !self.send_frame(frame).await {
                if let Some(id) = ack {
                    socket
                        .acks
                        .lock()
                        .expire(id, AckError::Disconnected(reasons::TRANSPORT_ERROR.into()));
                }
            }
            return;
        }

        match self.config.buffer {
            BufferPolicy::DropWhenDisconnected => {
                let name = frame.event_name().unwrap_or_default().to_string();
                warn!("dropping '{}' on {}, not connected", name, frame.namespace);
                match ack {
                    Some(id) => {
                        socket.acks.lock().expire(id, AckError::NotConnected);
                    }
                    None => self.dispatch(
                        &socket,
                        events::ERROR,
                        vec![format!("emit '{name}' dropped: not connected").into()],
                    ),
                }
            }
            BufferPolicy::BufferUntilReconnect { .. } => {
                debug!(
                    "buffering '{}' on {} until connected",
                    frame.event_name().unwrap_or_default(),
                    frame.namespace
                );
                if let Some(evicted) = self.buffer.push(BufferedEmit { frame, ack }) {
                    warn!(
                        "emit buffer full ({}), dropping oldest emit on {}",
                        self.buffer.capacity(),
                        evicted.frame.namespace
                    );
                    self.fail_buffered(evicted, AckError::Dropped);
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open().await,
            TransportEvent::Frame(frame) => {
                self.touch_heartbeat();
                self.on_frame(frame).await;
            }
            TransportEvent::Ping => {
                if self.status == ManagerStatus::Connected {
                    self.touch_heartbeat();
                    self.dispatch_all(events::PING, vec![]);
                }
            }
            TransportEvent::Pong(latency) => {
                if self.status == ManagerStatus::Connected {
                    self.touch_heartbeat();
                    let latency_ms = latency.as_millis() as u64;
                    debug!("pong from {} after {}ms", self.url, latency_ms);
                    self.dispatch_all(events::PONG, vec![latency_ms.into()]);
                }
            }
            TransportEvent::Close(reason) => {
                if self.opening {
                    self.on_open_failed(reason).await;
                } else if self.status == ManagerStatus::Connected {
                    self.on_transport_lost(&reason).await;
                }
            }
            TransportEvent::Error(err) => {
                if self.opening {
                    self.on_open_failed(err).await;
                } else if self.status == ManagerStatus::Connected {
                    error!("transport error: {err}");
                    self.dispatch_all(events::ERROR, vec![err.into()]);
                    self.on_transport_lost(reasons::TRANSPORT_ERROR).await;
                }
            }
        }
    }

    async fn open_transport(&mut self) {
        if self.opening || self.status == ManagerStatus::Connected {
            debug!("already connected or connecting, skipping");
            return;
        }

        self.epoch += 1;
        self.opening = true;
        self.set_status(if self.attempts > 0 {
            ManagerStatus::Reconnecting
        } else {
            ManagerStatus::Connecting
        });
        self.connect_deadline = self.config.timeout().map(|t| Instant::now() + t);

        info!("connecting to {} (attempt {})", self.url, self.epoch);
        let sink = TransportSink::new(self.epoch, self.events_tx.clone());
        let options = TransportOptions {
            transports: self.config.transports.clone(),
            query: self.config.query.clone(),
            timeout: self.config.timeout(),
        };
        if let Err(e) = self.transport.connect(&self.url, &options, sink).await {
            self.on_open_failed(e.to_string()).await;
        }
    }

    async fn on_open(&mut self) {
        if !self.opening {
            debug!("ignoring open outside of a connection attempt");
            return;
        }
        self.opening = false;
        self.connect_deadline = None;
        self.set_status(ManagerStatus::Connected);
        self.touch_heartbeat();

        let attempts = std::mem::take(&mut self.attempts);
        if attempts > 0 {
            info!("reconnected after {attempts} attempt(s)");
            self.dispatch_all(events::RECONNECT, vec![attempts.into()]);
        }

        for socket in self.sockets_snapshot() {
            if socket.status() == SocketStatus::Connecting {
                self.send_join(&socket).await;
            }
        }
    }

    async fn on_open_failed(&mut self, err: String) {
        self.opening = false;
        self.connect_deadline = None;
        self.teardown_transport().await;

        warn!("connection to {} failed: {}", self.url, err);
        self.dispatch_all(events::CONNECT_ERROR, vec![err.clone().into()]);
        if self.attempts > 0 {
            self.dispatch_all(events::RECONNECT_ERROR, vec![err.into()]);
        }
        self.schedule_reconnect().await;
    }

    async fn on_connect_timeout(&mut self) {
        if !self.opening {
            return;
        }
        let timeout_ms = self
            .config
            .timeout()
            .map_or(0, |t| t.as_millis() as u64);
        warn!("connection to {} timed out after {}ms", self.url, timeout_ms);
        self.dispatch_all(events::CONNECT_TIMEOUT, vec![timeout_ms.into()]);
        self.on_open_failed(reasons::CONNECT_TIMEOUT.to_string()).await;
    }

    async fn on_heartbeat_timeout(&mut self) {
        if self.status != ManagerStatus::Connected {
            return;
        }
        let silence_ms = self
            .config
            .heartbeat_timeout()
            .map_or(0, |t| t.as_millis() as u64);
        warn!("no traffic from {} for {}ms", self.url, silence_ms);
        self.on_transport_lost(reasons::PING_TIMEOUT).await;
    }

    async fn on_transport_lost(&mut self, reason: &str) {
        warn!("transport to {} lost: {}", self.url, reason);
        self.joined.clear();
        self.teardown_transport().await;

        let reconnecting = self.will_reconnect();
        for socket in self.sockets_snapshot() {
            if socket.on_close(reason, reconnecting) {
                self.dispatch(&socket, events::DISCONNECT, vec![reason.into()]);
            }
        }
        self.schedule_reconnect().await;
    }

    async fn on_frame(&mut self, frame: Frame) {
        let Some(socket) = self.socket(&frame.namespace) else {
            warn!(
                "dropping {} frame for unknown namespace {}",
                frame.packet.kind(),
                frame.namespace
            );
            return;
        };
        let namespace = frame.namespace;

        match frame.packet {
            Packet::Connect { data } => {
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let Some(sid) = sid else {
                    warn!("connect frame on {} without a session id, dropping", namespace);
                    return;
                };
                match socket.mark_connected(sid) {
                    SocketStatus::Connecting => {
                        info!("socket {} connected", namespace);
                        self.replay_buffered(&namespace).await;
                        self.dispatch(&socket, events::CONNECT, vec![]);
                    }
                    SocketStatus::Connected => {
                        debug!("duplicate connect frame on {}", namespace);
                    }
                    SocketStatus::Disconnected => {
                        debug!("socket {} closed while joining, leaving again", namespace);
                        self.joined.remove(&namespace);
                        self.send_frame(Frame::disconnect(namespace)).await;
                    }
                }
            }
            Packet::ConnectError { message } => {
                warn!("server refused namespace {}: {}", namespace, message);
                self.joined.remove(&namespace);
                self.discard_buffered(Some(&namespace));
                socket.on_close(&message, false);
                self.dispatch(&socket, events::CONNECT_ERROR, vec![message.clone().into()]);
                self.dispatch(&socket, events::ERROR, vec![message.into()]);
                self.close_if_idle().await;
            }
            Packet::Disconnect => {
                info!("server disconnected namespace {}", namespace);
                self.joined.remove(&namespace);
                self.discard_buffered(Some(&namespace));
                if socket.on_close(reasons::SERVER_DISCONNECT, false) {
                    self.dispatch(&socket, events::DISCONNECT, vec![reasons::SERVER_DISCONNECT.into()]);
                }
                self.close_if_idle().await;
            }
            Packet::Event { name, args, id } => {
                if socket.status() != SocketStatus::Connected {
                    debug!("dropping '{}' on {}, socket not connected", name, namespace);
                    return;
                }
                let ack = id.map(|id| AckResponder::new(namespace, id, self.commands_tx.clone()));
                let _ = self.dispatch.send(DispatchJob {
                    socket,
                    event: Event::new(name, args).with_ack(ack),
                });
            }
            Packet::Ack { id, args } => {
                socket.acks.lock().resolve(id, args);
            }
        }
    }

    async fn schedule_reconnect(&mut self) {
        if !self.will_reconnect() {
            self.give_up(reasons::TRANSPORT_CLOSE);
            return;
        }
        if let Some(max) = self.config.reconnection_attempts {
            if self.attempts >= max {
                error!("giving up on {} after {} reconnect attempts", self.url, self.attempts);
                self.dispatch_all(events::RECONNECT_FAILED, vec![]);
                self.give_up(reasons::RECONNECT_FAILED);
                return;
            }
        }

        let delay = self.backoff.delay(self.attempts);
        self.attempts += 1;
        info!(
            "reconnect attempt {} in {:.1}s",
            self.attempts,
            delay.as_secs_f64()
        );
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_status(ManagerStatus::Reconnecting);
    }

    async fn attempt_reconnect(&mut self) {
        if self.skip_reconnect {
            return;
        }
        debug!("reconnect attempt {}", self.attempts);
        self.dispatch_all(events::RECONNECT_ATTEMPT, vec![self.attempts.into()]);
        self.open_transport().await;
    }

    fn give_up(&mut self, reason: &str) {
        self.attempts = 0;
        self.reconnect_at = None;
        self.discard_buffered(None);
        for socket in self.sockets_snapshot() {
            socket.on_close(reason, false);
        }
        self.set_status(ManagerStatus::Disconnected);
    }

    async fn close_all(&mut self) {
        self.skip_reconnect = true;
        self.reconnect_at = None;
        self.connect_deadline = None;
        self.opening = false;
        self.attempts = 0;

        let was_open = self.status != ManagerStatus::Disconnected;
        if was_open {
            info!("closing manager for {}", self.url);
            self.set_status(ManagerStatus::Disconnecting);
        }

        self.discard_buffered(None);
        for socket in self.sockets_snapshot() {
            if socket.on_close(reasons::CLIENT_DISCONNECT, false) {
                self.dispatch(&socket, events::DISCONNECT, vec![reasons::CLIENT_DISCONNECT.into()]);
            }
        }

        self.joined.clear();
        self.teardown_transport().await;
        self.set_status(ManagerStatus::Disconnected);
    }

    async fn close_if_idle(&mut self) {
        if self.status == ManagerStatus::Disconnected {
            return;
        }
        if self.sockets_snapshot().iter().any(|s| s.is_active()) {
            return;
        }
        info!("no active sockets left, closing transport");
        self.close_all().await;
    }

    async fn send_join(&mut self, socket: &Arc<SocketShared>) {
        if !self.joined.insert(socket.namespace.clone()) {
            return;
        }
        debug!("joining namespace {}", socket.namespace);
        self.send_frame(Frame::connect(socket.namespace.clone(), socket.auth.clone()))
            .await;
    }

    async fn replay_buffered(&mut self, namespace: &str) {
        let pending = self.buffer.drain_namespace(namespace);
        if pending.is_empty() {
            return;
        }
        info!("replaying {} buffered emits on {}", pending.len(), namespace);
        for entry in pending {
            let ack = entry.ack;
            if let Some(id) = ack {
                if !self.ack_pending(namespace, id) {
                    debug!("skipping buffered emit on {}, ack {} already settled", namespace, id);
                    continue;
                }
            }
            if !self.send_frame(entry.frame).await {
                if let (Some(id), Some(socket)) = (ack, self.socket(namespace)) {
                    socket
                        .acks
                        .lock()
                        .expire(id, AckError::Disconnected(reasons::TRANSPORT_ERROR.into()));
                }
            }
        }
    }

    /// Drop buffered emits for `namespace`, or all of them. Their acks fail
    /// with `Dropped`.
    fn discard_buffered(&mut self, namespace: Option<&str>) {
        let dropped = match namespace {
            Some(namespace) => self.buffer.drain_namespace(namespace),
            None => self.buffer.drain_all(),
        };
        if !dropped.is_empty() {
            debug!("discarding {} buffered emits", dropped.len());
        }
        for entry in dropped {
            self.fail_buffered(entry, AckError::Dropped);
        }
    }

    fn fail_buffered(&self, entry: BufferedEmit, err: AckError) {
        if let (Some(id), Some(socket)) = (entry.ack, self.socket(&entry.frame.namespace)) {
            socket.acks.lock().expire(id, err);
        }
    }

    /// Send a frame on the open transport. Returns whether it was accepted.
    async fn send_frame(&mut self, frame: Frame) -> bool {
        match self.transport.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to send frame: {e}");
                false
            }
        }
    }

    async fn teardown_transport(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!("transport disconnect failed: {e}");
        }
        self.epoch += 1;
        self.heartbeat_deadline = None;
    }

    fn touch_heartbeat(&mut self) {
        if self.status == ManagerStatus::Connected {
            self.heartbeat_deadline = self.config.heartbeat_timeout().map(|t| Instant::now() + t);
        }
    }

    fn will_reconnect(&self) -> bool {
        self.config.reconnection && !self.skip_reconnect
    }

    fn socket(&self, namespace: &str) -> Option<Arc<SocketShared>> {
        self.sockets.lock().get(namespace).cloned()
    }

    fn ack_pending(&self, namespace: &str, id: AckId) -> bool {
        let Some(socket) = self.socket(namespace) else {
            return false;
        };
        let pending = socket.acks.lock().is_pending(id);
        pending
    }

    fn sockets_snapshot(&self) -> Vec<Arc<SocketShared>> {
        self.sockets.lock().values().cloned().collect()
    }

    fn dispatch(&self, socket: &Arc<SocketShared>, name: &str, args: Vec<Value>) {
        let _ = self.dispatch.send(DispatchJob {
            socket: socket.clone(),
            event: Event::new(name, args),
        });
    }

    /// Deliver a manager-level event to every socket.
    fn dispatch_all(&self, name: &str, args: Vec<Value>) {
        for socket in self.sockets_snapshot() {
            self.dispatch(&socket, name, args.clone());
        }
    }

    fn set_status(&mut self, status: ManagerStatus) {
        if self.status == status {
            return;
        }
        info!("manager state: {} -> {}", self.status, status);
        self.status = status;
        self.state_tx.send_replace(status);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
