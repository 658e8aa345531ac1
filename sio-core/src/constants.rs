//! Protocol and engine constants.

/// Namespace used when none is given.
pub const ROOT_NAMESPACE: &str = "/";

/// Default initial reconnect delay in milliseconds.
pub const DEFAULT_RECONNECTION_DELAY_MS: u64 = 1_000;

/// Default reconnect delay cap in milliseconds.
pub const DEFAULT_RECONNECTION_DELAY_MAX_MS: u64 = 5_000;

/// Default connection timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Default capacity of the offline emit buffer.
pub const DEFAULT_BUFFER_CAP: usize = 1_024;

/// Capacity of the dispatch error broadcast channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

/// File name prefix for rotated log files.
pub const LOG_FILE_PREFIX: &str = "sio-client.log";

/// Event names the engine dispatches on its own, outside of server traffic.
pub mod events {
    pub const CONNECT: &str = "connect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const CONNECT_TIMEOUT: &str = "connect_timeout";
    pub const DISCONNECT: &str = "disconnect";
    pub const ERROR: &str = "error";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const RECONNECT: &str = "reconnect";
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
    pub const RECONNECT_ERROR: &str = "reconnect_error";
    pub const RECONNECT_FAILED: &str = "reconnect_failed";

    /// Names an application may not emit because the engine owns them.
    pub const RESERVED: &[&str] = &[
        CONNECT,
        CONNECT_ERROR,
        CONNECT_TIMEOUT,
        DISCONNECT,
        ERROR,
        PING,
        PONG,
        RECONNECT,
        RECONNECT_ATTEMPT,
        RECONNECT_ERROR,
        RECONNECT_FAILED,
    ];

    /// Whether `name` is an engine-owned event.
    pub fn is_reserved(name: &str) -> bool {
        RESERVED.contains(&name)
    }
}

/// Disconnect reasons passed to `disconnect` listeners and failed acks.
pub mod reasons {
    pub const CLIENT_DISCONNECT: &str = "io client disconnect";
    pub const SERVER_DISCONNECT: &str = "io server disconnect";
    pub const TRANSPORT_CLOSE: &str = "transport close";
    pub const TRANSPORT_ERROR: &str = "transport error";
    pub const RECONNECT_FAILED: &str = "reconnect failed";
    pub const CONNECT_TIMEOUT: &str = "timeout";
    pub const PING_TIMEOUT: &str = "ping timeout";
}
