//! Bounded FIFO of emits made while disconnected.

use std::collections::VecDeque;

use crate::packet::{AckId, Frame};

/// An emit waiting for its namespace to reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEmit {
    pub frame: Frame,
    /// Ack id registered on the emitting socket, if any.
    pub ack: Option<AckId>,
}

/// Outbound buffer shared by all sockets of a manager. When full, the oldest
/// entry is evicted to make room.
#[derive(Debug)]
pub struct EmitBuffer {
    cap: usize,
    queue: VecDeque<BufferedEmit>,
}

impl EmitBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            queue: VecDeque::new(),
        }
    }

    /// Append an emit. Returns the evicted entry when the buffer was full.
    pub fn push(&mut self, entry: BufferedEmit) -> Option<BufferedEmit> {
        let evicted = if self.queue.len() >= self.cap {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(entry);
        evicted
    }

    /// Remove and return the entries for `namespace`, oldest first. Entries
    /// for other namespaces keep their relative order.
    pub fn drain_namespace(&mut self, namespace: &str) -> Vec<BufferedEmit> {
        let mut drained = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for entry in self.queue.drain(..) {
            if entry.frame.namespace == namespace {
                drained.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.queue = kept;
        drained
    }

    pub fn drain_all(&mut self) -> Vec<BufferedEmit> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}
