//! Connection manager.
//!
//! A `Manager` owns one transport to one endpoint and multiplexes any number
//! of namespace sockets over it. It spawns two tasks: the I/O task that owns
//! the transport, handles reconnection with exponential backoff and jitter,
//! and routes inbound frames, and the dispatch task that runs listeners.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use url::Url;

use sio_core::config::ClientConfig;
use sio_core::constants::{ERROR_CHANNEL_CAPACITY, ROOT_NAMESPACE};
use sio_core::error::{DispatchError, SioError, SioResult};

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::dispatch::run_dispatcher;
use crate::driver::{Command, CommandTx, Driver, SocketMap};
use crate::socket::{Socket, SocketOptions, SocketShared};
use crate::transport::Transport;

/// Transport-level state of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerStatus {
    /// No transport and no attempt in progress.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Transport open.
    Connected,
    /// Waiting for or running a reconnect attempt.
    Reconnecting,
    /// Closing on request.
    Disconnecting,
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerStatus::Disconnected => write!(f, "disconnected"),
            ManagerStatus::Connecting => write!(f, "connecting"),
            ManagerStatus::Connected => write!(f, "connected"),
            ManagerStatus::Reconnecting => write!(f, "reconnecting"),
            ManagerStatus::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Normalize a namespace: empty becomes `/`, a leading `/` is added.
pub fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim();
    if trimmed.is_empty() {
        ROOT_NAMESPACE.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

struct ManagerShared {
    url: Url,
    config: ClientConfig,
    sockets: SocketMap,
    commands: CommandTx,
    state_rx: watch::Receiver<ManagerStatus>,
    errors: broadcast::Sender<DispatchError>,
    runtime: Handle,
}

impl Drop for ManagerShared {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Handle to a connection manager. Clones share the same manager; the
/// transport is torn down when the last handle is dropped.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerShared>,
}

impl Manager {
    /// Create a manager for `url` with the default exponential backoff.
    ///
    /// Must be called within a tokio runtime. Nothing connects until a socket
    /// connects or [`Manager::open`] is called.
    pub fn new(url: &str, config: ClientConfig, transport: Box<dyn Transport>) -> SioResult<Self> {
        let backoff = ExponentialBackoff::from_config(&config);
        Self::with_backoff(url, config, transport, Box::new(backoff))
    }

    /// Create a manager with a custom reconnect delay policy.
    pub fn with_backoff(
        url: &str,
        config: ClientConfig,
        transport: Box<dyn Transport>,
        backoff: Box<dyn Backoff>,
    ) -> SioResult<Self> {
        config.validate()?;
        let url = Url::parse(url).map_err(|e| SioError::InvalidUrl(format!("{url}: {e}")))?;
        let runtime = Handle::try_current().map_err(anyhow::Error::from)?;

        let sockets: SocketMap = Arc::new(Mutex::new(BTreeMap::new()));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ManagerStatus::Disconnected);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        let driver = Driver::new(
            url.clone(),
            config.clone(),
            transport,
            backoff,
            sockets.clone(),
            commands_rx,
            commands_tx.clone(),
            dispatch_tx,
            state_tx,
        );
        runtime.spawn(driver.run());
        runtime.spawn(run_dispatcher(dispatch_rx, errors.clone()));

        info!("manager created for {}", url);

        Ok(Self {
            inner: Arc::new(ManagerShared {
                url,
                config,
                sockets,
                commands: commands_tx,
                state_rx,
                errors,
                runtime,
            }),
        })
    }

    /// Socket for `namespace`, created on first use. Repeated calls return
    /// the same socket. New sockets connect right away when `auto_connect`
    /// is set.
    pub fn socket(&self, namespace: &str, options: SocketOptions) -> Socket {
        let namespace = normalize_namespace(namespace);

        let (shared, created) = {
            let mut sockets = self.inner.sockets.lock();
            match sockets.get(&namespace) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let shared = Arc::new(SocketShared::new(
                        namespace.clone(),
                        options,
                        self.inner.commands.clone(),
                        self.inner.config.buffer,
                        self.inner.config.ack_timeout(),
                        self.inner.runtime.clone(),
                    ));
                    sockets.insert(namespace.clone(), shared.clone());
                    (shared, true)
                }
            }
        };

        let socket = Socket::from_shared(shared);
        if created && self.inner.config.auto_connect {
            if let Err(e) = socket.connect() {
                warn!("auto-connect of {} failed: {}", namespace, e);
            }
        }
        socket
    }

    /// Open the transport. Idempotent.
    pub fn open(&self) -> SioResult<()> {
        self.send(Command::Open)
    }

    /// Alias of [`Manager::open`].
    pub fn connect(&self) -> SioResult<()> {
        self.open()
    }

    /// Disconnect every socket, cancel any pending reconnect and close the
    /// transport.
    pub fn close(&self) -> SioResult<()> {
        self.send(Command::Close)
    }

    /// Alias of [`Manager::close`].
    pub fn disconnect(&self) -> SioResult<()> {
        self.close()
    }

    pub fn status(&self) -> ManagerStatus {
        *self.inner.state_rx.borrow()
    }

    /// Watch channel following [`Manager::status`].
    pub fn state_receiver(&self) -> watch::Receiver<ManagerStatus> {
        self.inner.state_rx.clone()
    }

    /// Listener failures from every socket of this manager.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<DispatchError> {
        self.inner.errors.subscribe()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.inner
            .sockets
            .lock()
            .contains_key(&normalize_namespace(namespace))
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.inner.sockets.lock().keys().cloned().collect()
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same manager.
    pub fn ptr_eq(&self, other: &Manager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Disconnected, with no active socket and no socket handle held outside
    /// the manager. Nothing can bring such a manager back into use.
    pub(crate) fn is_unused(&self) -> bool {
        self.status() == ManagerStatus::Disconnected
            && self
                .inner
                .sockets
                .lock()
                .values()
                .all(|s| !s.is_active() && Arc::strong_count(s) == 1)
    }

    fn send(&self, command: Command) -> SioResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| SioError::Closed)
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("url", &self.inner.url.as_str())
            .field("status", &self.status())
            .field("namespaces", &self.namespaces())
            .finish()
    }
}
