//! Outstanding acknowledgement tracking.
//!
//! Every `emit_with_ack` registers a pending entry keyed by a monotonically
//! increasing id. The entry settles exactly once: by a matching inbound ack,
//! by its deadline passing, or by the socket disconnecting.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use sio_core::error::{AckError, SioError, SioResult};

use crate::driver::{Command, CommandTx};
use crate::packet::{AckId, Frame};
use crate::value::Value;

/// Outcome delivered to whoever awaits an ack.
pub type AckResult = Result<Vec<Value>, AckError>;

struct PendingAck {
    tx: oneshot::Sender<AckResult>,
    created_at: Instant,
    deadline: Option<Instant>,
}

/// Pending acks for one socket.
pub struct AckTracker {
    next_id: AckId,
    pending: HashMap<AckId, PendingAck>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Allocate an id and a handle that resolves when the ack settles.
    pub fn register_pending(&mut self, timeout: Option<Duration>) -> (AckId, AckHandle) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        let created_at = Instant::now();
        self.pending.insert(
            id,
            PendingAck {
                tx,
                created_at,
                deadline: timeout.map(|t| created_at + t),
            },
        );
        (id, AckHandle { id, rx })
    }

    /// Settle `id` with the server's reply. Unknown or already settled ids
    /// are ignored.
    pub fn resolve(&mut self, id: AckId, args: Vec<Value>) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                debug!("ack {} resolved after {:?}", id, entry.created_at.elapsed());
                let _ = entry.tx.send(Ok(args));
                true
            }
            None => {
                debug!("ignoring ack for unknown id {}", id);
                false
            }
        }
    }

    /// Fail a single pending ack.
    pub fn expire(&mut self, id: AckId, err: AckError) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                let _ = entry.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fail every pending ack with `Disconnected(reason)`.
    pub fn expire_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            let _ = entry.tx.send(Err(AckError::Disconnected(reason.to_string())));
        }
        if count > 0 {
            debug!("expired {} pending acks: {}", count, reason);
        }
        count
    }

    /// Fail every ack whose deadline is at or before `now`.
    pub fn expire_due(&mut self, now: Instant) -> usize {
        let due: Vec<AckId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.expire(*id, AckError::Timeout);
        }
        due.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: AckId) -> bool {
        self.pending.contains_key(&id)
    }
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Future for a pending ack.
#[derive(Debug)]
pub struct AckHandle {
    id: AckId,
    rx: oneshot::Receiver<AckResult>,
}

impl AckHandle {
    pub fn id(&self) -> AckId {
        self.id
    }
}

impl Future for AckHandle {
    type Output = AckResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(AckError::Closed)))
    }
}

/// Replies to a server event that requested an ack. Only the first reply is
/// sent; clones share that state.
#[derive(Debug, Clone)]
pub struct AckResponder {
    namespace: String,
    id: AckId,
    commands: CommandTx,
    sent: Arc<AtomicBool>,
}

impl AckResponder {
    pub(crate) fn new(namespace: impl Into<String>, id: AckId, commands: CommandTx) -> Self {
        Self {
            namespace: namespace.into(),
            id,
            commands,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> AckId {
        self.id
    }

    /// Whether a reply has already been sent.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Send the reply. Later calls fail with `Protocol`.
    pub fn send(&self, args: Vec<Value>) -> SioResult<()> {
        if self.sent.swap(true, Ordering::AcqRel) {
            return Err(SioError::Protocol(format!(
                "ack {} on {} already answered",
                self.id, self.namespace
            )));
        }
        let frame = Frame::ack(self.namespace.clone(), self.id, args);
        self.commands
            .send(Command::AckReply { frame })
            .map_err(|_| SioError::Closed)
    }
}
