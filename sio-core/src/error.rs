//! Error types for the client engine.
//!
//! Every failure the engine can report is one of the `SioError` variants.
//! Ack-specific outcomes live in `AckError` so they can be delivered to a
//! single pending ack without involving the rest of the connection, and
//! listener failures are carried as `DispatchError` values.

use thiserror::Error;

/// Convenience type alias for Results using SioError.
pub type SioResult<T> = Result<T, SioError>;

/// Unified error type for the client engine.
#[derive(Error, Debug)]
pub enum SioError {
    // -- Connection errors --
    /// The transport failed to establish or maintain a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation requires a connected socket.
    #[error("not connected")]
    NotConnected,

    /// The transport rejected or failed an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The manager's I/O task has stopped.
    #[error("manager closed")]
    Closed,

    // -- Ack errors --
    /// A pending ack was not resolved in time.
    #[error("ack timeout")]
    AckTimeout,

    /// A pending ack failed for a reason other than a timeout.
    #[error("ack failed: {0}")]
    Ack(AckError),

    // -- Dispatch / protocol errors --
    /// A listener failed while handling an event.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A malformed or unexpected frame was received.
    #[error("protocol error: {0}")]
    Protocol(String),

    // -- Configuration errors --
    /// Failed to load, parse or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<AckError> for SioError {
    fn from(e: AckError) -> Self {
        match e {
            AckError::Timeout => SioError::AckTimeout,
            other => SioError::Ack(other),
        }
    }
}

impl From<serde_json::Error> for SioError {
    fn from(e: serde_json::Error) -> Self {
        SioError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SioError {
    fn from(e: toml::de::Error) -> Self {
        SioError::Config(e.to_string())
    }
}

/// Outcome delivered to an ack handle that will never receive a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    /// No reply arrived before the ack deadline.
    #[error("timed out waiting for ack")]
    Timeout,

    /// The socket disconnected while the ack was pending.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The emit was dropped because the socket was not connected.
    #[error("not connected")]
    NotConnected,

    /// The emit was evicted from, or discarded with, the offline buffer.
    #[error("dropped from emit buffer")]
    Dropped,

    /// The manager stopped before the ack could complete.
    #[error("manager closed")]
    Closed,
}

/// A listener returned an error or panicked during dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener {listener} for '{event}' on {namespace} failed: {message}")]
pub struct DispatchError {
    /// Namespace of the socket that dispatched the event.
    pub namespace: String,
    /// Event name being dispatched.
    pub event: String,
    /// Subscription id of the failing listener.
    pub listener: u64,
    /// Error or panic message.
    pub message: String,
}
