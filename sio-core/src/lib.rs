//! sio core - foundation types shared by the client crates.
//!
//! This crate provides:
//! - Client configuration (reconnection policy, timeouts, buffering)
//! - The error taxonomy used across the engine
//! - Structured logging setup with tracing
//! - Protocol constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

// Re-export commonly used items at the crate root
pub use config::{BufferPolicy, ClientConfig, TransportKind};
pub use error::{AckError, DispatchError, SioError, SioResult};
pub use logging::{init_logging, LoggingConfig};
