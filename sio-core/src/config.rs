//! Client configuration.
//!
//! Holds the options a `Manager` recognizes: reconnection policy, connect and
//! ack timeouts, transport preferences and the offline emit buffer. Every
//! field has a default, so a partial TOML document is a valid configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{SioError, SioResult};

/// Options recognized by a manager and the sockets it hands out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Reconnect automatically after an unexpected transport loss.
    #[serde(default = "default_true")]
    pub reconnection: bool,

    /// Maximum reconnect attempts. `None` retries forever.
    #[serde(default)]
    pub reconnection_attempts: Option<u32>,

    /// Initial delay between reconnect attempts in milliseconds.
    #[serde(default = "default_reconnection_delay")]
    pub reconnection_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds.
    #[serde(default = "default_reconnection_delay_max")]
    pub reconnection_delay_max_ms: u64,

    /// Jitter factor (0.0 to 1.0) applied to each reconnect delay.
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// Connection timeout in milliseconds. 0 disables the timeout.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Default deadline for acks in milliseconds. `None` waits until disconnect.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,

    /// Drop the transport when nothing arrives from the server for this many
    /// milliseconds. `None` leaves liveness to the transport.
    #[serde(default)]
    pub heartbeat_timeout_ms: Option<u64>,

    /// Always create a fresh manager instead of reusing a cached one.
    #[serde(default)]
    pub force_new: bool,

    /// Connect new sockets as soon as they are created.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Transports to try, in order of preference.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    /// Query parameters sent with the transport handshake.
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// What happens to emits issued while disconnected.
    #[serde(default)]
    pub buffer: BufferPolicy,
}

/// Underlying transport flavours a transport implementation may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Polling,
}

/// Manager-wide policy for emits issued while a socket is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Fail the emit immediately.
    DropWhenDisconnected,
    /// Queue up to `cap` emits and replay them on (re)connect. The oldest
    /// entry is evicted once the cap is reached.
    BufferUntilReconnect {
        cap: usize,
    },
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy::BufferUntilReconnect {
            cap: constants::DEFAULT_BUFFER_CAP,
        }
    }
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_reconnection_delay() -> u64 {
    constants::DEFAULT_RECONNECTION_DELAY_MS
}

fn default_reconnection_delay_max() -> u64 {
    constants::DEFAULT_RECONNECTION_DELAY_MAX_MS
}

fn default_randomization_factor() -> f64 {
    0.5
}

fn default_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::Websocket, TransportKind::Polling]
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay_ms: default_reconnection_delay(),
            reconnection_delay_max_ms: default_reconnection_delay_max(),
            randomization_factor: default_randomization_factor(),
            timeout_ms: default_timeout(),
            ack_timeout_ms: None,
            heartbeat_timeout_ms: None,
            force_new: false,
            auto_connect: true,
            transports: default_transports(),
            query: BTreeMap::new(),
            buffer: BufferPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> SioResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> SioResult<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> SioResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SioError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject combinations the manager cannot honor.
    pub fn validate(&self) -> SioResult<()> {
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(SioError::Config(format!(
                "randomization_factor must be within 0.0..=1.0, got {}",
                self.randomization_factor
            )));
        }
        if self.reconnection_delay_max_ms < self.reconnection_delay_ms {
            return Err(SioError::Config(
                "reconnection_delay_max_ms is lower than reconnection_delay_ms".into(),
            ));
        }
        if self.heartbeat_timeout_ms == Some(0) {
            return Err(SioError::Config("heartbeat_timeout_ms must be greater than zero".into()));
        }
        if self.transports.is_empty() {
            return Err(SioError::Config("at least one transport is required".into()));
        }
        if let BufferPolicy::BufferUntilReconnect { cap: 0 } = self.buffer {
            return Err(SioError::Config("buffer cap must be greater than zero".into()));
        }
        Ok(())
    }

    /// Initial reconnect delay.
    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    /// Reconnect delay cap.
    pub fn reconnection_delay_max(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_max_ms)
    }

    /// Connection timeout, if enabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Default ack deadline, if any.
    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    /// Silence allowed on an open transport before it is considered dead.
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_ms.map(Duration::from_millis)
    }
}
