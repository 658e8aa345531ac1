//! Namespace-level protocol packets.
//!
//! The transport encodes and decodes these; the manager only routes them.

use crate::value::Value;

/// Local correlation id for acks.
pub type AckId = u64;

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Namespace join. Outgoing it carries the auth payload; incoming it
    /// carries `{ "sid": "<session id>" }`.
    Connect { data: Option<Value> },
    /// Namespace leave, in either direction.
    Disconnect,
    /// A named event. `id` is set when the sender expects an ack.
    Event {
        name: String,
        args: Vec<Value>,
        id: Option<AckId>,
    },
    /// Reply to an event that carried an ack id.
    Ack { id: AckId, args: Vec<Value> },
    /// The server refused the namespace join.
    ConnectError { message: String },
}

impl Packet {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Disconnect => "disconnect",
            Packet::Event { .. } => "event",
            Packet::Ack { .. } => "ack",
            Packet::ConnectError { .. } => "connect_error",
        }
    }
}

/// A packet tagged with the namespace it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub namespace: String,
    pub packet: Packet,
}

impl Frame {
    pub fn new(namespace: impl Into<String>, packet: Packet) -> Self {
        Self {
            namespace: namespace.into(),
            packet,
        }
    }

    pub fn connect(namespace: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(namespace, Packet::Connect { data })
    }

    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self::new(namespace, Packet::Disconnect)
    }

    pub fn event(
        namespace: impl Into<String>,
        name: impl Into<String>,
        args: Vec<Value>,
        id: Option<AckId>,
    ) -> Self {
        Self::new(
            namespace,
            Packet::Event {
                name: name.into(),
                args,
                id,
            },
        )
    }

    pub fn ack(namespace: impl Into<String>, id: AckId, args: Vec<Value>) -> Self {
        Self::new(namespace, Packet::Ack { id, args })
    }

    /// Event name, if this frame carries an event.
    pub fn event_name(&self) -> Option<&str> {
        match &self.packet {
            Packet::Event { name, .. } => Some(name),
            _ => None,
        }
    }
}
