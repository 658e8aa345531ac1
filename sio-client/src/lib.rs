//! sio client - namespace-multiplexed real-time event client.
//!
//! This crate provides:
//! - A `Manager` that owns one transport, reconnects with backoff and routes
//!   frames to namespaces
//! - Namespace-scoped `Socket`s with listener registration, emits and acks
//! - Offline emit buffering with replay on reconnect
//! - A `ManagerRegistry` that shares managers between sockets of one endpoint
//! - The `Transport` trait that concrete wire transports implement

pub mod ack;
pub mod backoff;
pub mod buffer;
mod dispatch;
mod driver;
pub mod events;
pub mod lookup;
pub mod manager;
pub mod packet;
pub mod socket;
pub mod transport;
pub mod value;

// Re-export key types
pub use ack::{AckHandle, AckResponder, AckResult, AckTracker};
pub use backoff::{Backoff, ConstantBackoff, ExponentialBackoff};
pub use events::{Event, EventRegistry, Listener, ListenerResult, SubscriptionId};
pub use lookup::{parse_endpoint, ManagerRegistry, ParsedUrl};
pub use manager::{Manager, ManagerStatus};
pub use packet::{AckId, Frame, Packet};
pub use socket::{Socket, SocketOptions, SocketStatus};
pub use transport::{Transport, TransportEvent, TransportOptions, TransportSink};
pub use value::Value;

pub use sio_core::{AckError, BufferPolicy, ClientConfig, DispatchError, SioError, SioResult};
