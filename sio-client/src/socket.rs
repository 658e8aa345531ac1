//! Namespace-scoped socket handle.
//!
//! A `Socket` is a cheap, clonable handle. All network work is handed to the
//! owning manager's I/O task through its command channel; nothing here blocks
//! on the network.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::debug;

use sio_core::config::BufferPolicy;
use sio_core::constants::{events, reasons};
use sio_core::error::{AckError, SioError, SioResult};

use crate::ack::{AckHandle, AckTracker};
use crate::driver::{Command, CommandTx};
use crate::events::{Event, EventRegistry, ListenerResult, SubscriptionId};
use crate::packet::Frame;
use crate::value::Value;

/// Lifecycle state of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketStatus::Disconnected => write!(f, "disconnected"),
            SocketStatus::Connecting => write!(f, "connecting"),
            SocketStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Per-socket options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketOptions {
    /// Payload sent with every namespace join.
    pub auth: Option<Value>,
}

struct SocketState {
    status: SocketStatus,
    id: Option<String>,
}

pub(crate) struct SocketShared {
    pub(crate) namespace: String,
    pub(crate) auth: Option<Value>,
    state: Mutex<SocketState>,
    pub(crate) registry: EventRegistry,
    pub(crate) acks: Mutex<AckTracker>,
    commands: CommandTx,
    buffer_policy: BufferPolicy,
    ack_timeout: Option<Duration>,
    runtime: Handle,
}

impl SocketShared {
    pub(crate) fn new(
        namespace: String,
        options: SocketOptions,
        commands: CommandTx,
        buffer_policy: BufferPolicy,
        ack_timeout: Option<Duration>,
        runtime: Handle,
    ) -> Self {
        Self {
            registry: EventRegistry::new(namespace.clone()),
            namespace,
            auth: options.auth,
            state: Mutex::new(SocketState {
                status: SocketStatus::Disconnected,
                id: None,
            }),
            acks: Mutex::new(AckTracker::new()),
            commands,
            buffer_policy,
            ack_timeout,
            runtime,
        }
    }

    pub(crate) fn status(&self) -> SocketStatus {
        self.state.lock().status
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status() != SocketStatus::Disconnected
    }

    /// Record a confirmed namespace join. Only a `Connecting` socket moves to
    /// `Connected`; the previous status is returned either way.
    pub(crate) fn mark_connected(&self, sid: String) -> SocketStatus {
        let mut state = self.state.lock();
        let previous = state.status;
        if previous == SocketStatus::Connecting {
            state.status = SocketStatus::Connected;
            state.id = Some(sid);
        }
        previous
    }

    /// Leave the connected state. A socket that will be re-joined after a
    /// reconnect goes back to `Connecting` and keeps acks for emits that were
    /// never sent; otherwise it ends `Disconnected` with every pending ack
    /// failed. Acks are expired before this returns, so before any
    /// `disconnect` listener runs. Returns whether the socket was connected.
    pub(crate) fn on_close(&self, reason: &str, reconnecting: bool) -> bool {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.status;
            if previous == SocketStatus::Disconnected {
                return false;
            }
            state.status = if reconnecting {
                SocketStatus::Connecting
            } else {
                SocketStatus::Disconnected
            };
            state.id = None;
            previous
        };

        let was_connected = previous == SocketStatus::Connected;
        if was_connected || !reconnecting {
            self.acks.lock().expire_all(reason);
        }
        debug!(
            "socket {}: {} -> {} ({})",
            self.namespace,
            previous,
            self.status(),
            reason
        );
        was_connected
    }
}

/// Handle to one namespace on a manager.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketShared>,
}

impl Socket {
    pub(crate) fn from_shared(inner: Arc<SocketShared>) -> Self {
        Self { inner }
    }

    /// Whether both handles refer to the same socket.
    pub fn ptr_eq(&self, other: &Socket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Server-assigned session id, present only while connected.
    pub fn id(&self) -> Option<String> {
        self.inner.state.lock().id.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn status(&self) -> SocketStatus {
        self.inner.status()
    }

    pub fn connected(&self) -> bool {
        self.status() == SocketStatus::Connected
    }

    pub fn disconnected(&self) -> bool {
        !self.connected()
    }

    /// Join the namespace, opening the manager's transport if needed.
    /// Does nothing unless the socket is disconnected.
    pub fn connect(&self) -> SioResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.status != SocketStatus::Disconnected {
                return Ok(());
            }
            state.status = SocketStatus::Connecting;
        }
        debug!("socket {}: connect requested", self.inner.namespace);
        self.send_command(Command::Join(self.inner.namespace.clone()))
    }

    /// Alias of [`Socket::connect`].
    pub fn open(&self) -> SioResult<()> {
        self.connect()
    }

    /// Leave the namespace. Pending acks fail with
    /// `Disconnected("io client disconnect")` before this returns; the
    /// `disconnect` event follows on the dispatch task if the socket was
    /// connected.
    pub fn disconnect(&self) -> SioResult<()> {
        let was_connected = self.inner.on_close(reasons::CLIENT_DISCONNECT, false);
        self.send_command(Command::Leave {
            namespace: self.inner.namespace.clone(),
            was_connected,
        })
    }

    /// Alias of [`Socket::disconnect`].
    pub fn close(&self) -> SioResult<()> {
        self.disconnect()
    }

    pub fn on<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.registry.on(event, listener)
    }

    pub fn once<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.registry.once(event, listener)
    }

    /// Remove one listener, or all listeners of `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<SubscriptionId>) {
        self.inner.registry.off(event, id);
    }

    /// Remove every listener on this socket.
    pub fn off_all(&self) {
        self.inner.registry.clear();
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.registry.listener_count(event)
    }

    /// Number of acks still waiting for a reply.
    pub fn pending_acks(&self) -> usize {
        self.inner.acks.lock().pending_count()
    }

    /// Emit an event without an ack.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> SioResult<()> {
        self.check_emittable(event)?;
        if self.drops_when_offline() && !self.connected() {
            debug!("socket {}: dropping '{}' while disconnected", self.inner.namespace, event);
            return Err(SioError::NotConnected);
        }
        let frame = Frame::event(self.inner.namespace.clone(), event, args, None);
        self.send_command(Command::Emit { frame, ack: None })
    }

    /// Emit an event and wait for the server's reply, using the configured
    /// ack timeout.
    pub fn emit_with_ack(&self, event: &str, args: Vec<Value>) -> SioResult<AckHandle> {
        self.emit_with_ack_timeout(event, args, self.inner.ack_timeout)
    }

    /// Emit an event and wait for the server's reply. With `timeout` set the
    /// handle fails with `AckError::Timeout` once it elapses.
    ///
    /// If the emit cannot be sent or buffered, the returned handle is already
    /// failed with `AckError::NotConnected`.
    pub fn emit_with_ack_timeout(
        &self,
        event: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> SioResult<AckHandle> {
        self.check_emittable(event)?;

        let (id, handle) = self.inner.acks.lock().register_pending(timeout);

        if self.drops_when_offline() && !self.connected() {
            debug!("socket {}: failing ack {} for '{}', not connected", self.inner.namespace, id, event);
            self.inner.acks.lock().expire(id, AckError::NotConnected);
            return Ok(handle);
        }

        if let Some(timeout) = timeout {
            let weak = Arc::downgrade(&self.inner);
            self.inner.runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(shared) = weak.upgrade() {
                    shared.acks.lock().expire_due(Instant::now());
                }
            });
        }

        let frame = Frame::event(self.inner.namespace.clone(), event, args, Some(id));
        if let Err(e) = self.send_command(Command::Emit {
            frame,
            ack: Some(id),
        }) {
            self.inner.acks.lock().expire(id, AckError::Closed);
            return Err(e);
        }
        Ok(handle)
    }

    fn check_emittable(&self, event: &str) -> SioResult<()> {
        if events::is_reserved(event) {
            return Err(SioError::Protocol(format!("'{event}' is a reserved event name")));
        }
        Ok(())
    }

    fn drops_when_offline(&self) -> bool {
        matches!(self.inner.buffer_policy, BufferPolicy::DropWhenDisconnected)
    }

    fn send_command(&self, command: Command) -> SioResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| SioError::Closed)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("namespace", &self.inner.namespace)
            .field("status", &self.status())
            .field("id", &self.id())
            .finish()
    }
}
