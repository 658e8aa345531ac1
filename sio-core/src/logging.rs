//! Structured logging setup using the `tracing` ecosystem.
//!
//! The engine only emits `tracing` events. Embedders that do not install
//! their own subscriber can use these helpers: a compact stderr layer, plus
//! an optional daily-rotated file layer in text or JSON.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::constants::LOG_FILE_PREFIX;
use crate::error::SioResult;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging settings, usually read from the `[logging]` table of a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Any `EnvFilter` directive, e.g. `"info"` or `"sio_client=debug"`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rotated log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Write the file log as JSON lines.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            json: false,
        }
    }
}

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LogGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> SioResult<LogGuard> {
    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer: BoxedLayer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(env_filter(&config.level))
        .try_init()
        .map_err(anyhow::Error::from)?;

    match &config.dir {
        Some(dir) => tracing::info!(
            "logging initialized at level={}, dir={}",
            config.level,
            dir.display()
        ),
        None => tracing::info!("logging initialized at level={}", config.level),
    }

    Ok(LogGuard { _guard: guard })
}

/// Console-only logger for tests and small tools. Later calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).compact())
        .with(env_filter(level))
        .try_init();
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}
