//! Boundary to the underlying duplex channel.
//!
//! A transport implementation (WebSocket, long-polling, an in-memory test
//! double) is driven exclusively by the manager's I/O task. It reports
//! connection state and inbound frames through the `TransportSink` it was
//! handed on `connect`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use sio_core::config::TransportKind;
use sio_core::error::SioResult;

use crate::packet::Frame;

/// Options forwarded to the transport on every connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// Transports to try, in order of preference.
    pub transports: Vec<TransportKind>,
    /// Query parameters for the handshake request.
    pub query: BTreeMap<String, String>,
    /// Connection timeout enforced by the manager.
    pub timeout: Option<Duration>,
}

/// Connection-level notifications from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is established and frames may be sent.
    Open,
    /// The connection closed. Carries the reason.
    Close(String),
    /// A decoded inbound frame.
    Frame(Frame),
    /// The connection failed or could not be established.
    Error(String),
    /// A heartbeat probe went out on the connection.
    Ping,
    /// The heartbeat was answered after the given round trip.
    Pong(Duration),
}

/// Callback channel handed to a transport for one connection attempt.
///
/// Each sink is tagged with the attempt it belongs to, so events a transport
/// reports after the manager moved on to a newer attempt are discarded.
#[derive(Debug, Clone)]
pub struct TransportSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    /// Deliver an event. Returns false once the manager has stopped.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }

    pub fn open(&self) -> bool {
        self.send(TransportEvent::Open)
    }

    pub fn close(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Close(reason.into()))
    }

    pub fn frame(&self, frame: Frame) -> bool {
        self.send(TransportEvent::Frame(frame))
    }

    pub fn error(&self, err: impl Into<String>) -> bool {
        self.send(TransportEvent::Error(err.into()))
    }

    pub fn ping(&self) -> bool {
        self.send(TransportEvent::Ping)
    }

    pub fn pong(&self, latency: Duration) -> bool {
        self.send(TransportEvent::Pong(latency))
    }

    /// Whether the manager behind this sink is still running.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An abstract duplex channel the manager drives.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Start a connection attempt. Returning `Ok` means the attempt is under
    /// way; completion is reported with `TransportEvent::Open` or
    /// `TransportEvent::Error` through `sink`.
    async fn connect(
        &mut self,
        url: &Url,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> SioResult<()>;

    /// Send one frame on the open connection.
    async fn send(&mut self, frame: Frame) -> SioResult<()>;

    /// Tear down the connection. Must be safe to call when not connected.
    async fn disconnect(&mut self) -> SioResult<()>;
}
