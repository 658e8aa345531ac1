//! Reconnect delay policies.

use std::time::Duration;

use sio_core::config::ClientConfig;

/// Computes the wait before reconnect attempt `attempt` (0-based).
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `base * 2^attempt`, capped at `max`, with +/- `jitter_factor` randomization.
///
/// Jitter bands of neighbouring attempts overlap, so two consecutive delays
/// are not strictly ordered. Each delay is floored at the previous attempt's
/// unjittered delay, which keeps the sequence from dropping below the
/// schedule it follows.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the computed delay used as the jitter range (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.reconnection_delay(),
            config.reconnection_delay_max(),
            config.randomization_factor,
        )
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base.as_secs_f64();
        let max = self.max.as_secs_f64();

        let unjittered = |n: u32| (base * 2.0_f64.powi(n.min(31) as i32)).min(max);
        let exponential = unjittered(attempt);
        let floor = attempt.checked_sub(1).map_or(0.0, unjittered);

        let jitter_range = exponential * self.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let delay = (exponential + jitter).max(floor);

        Duration::from_secs_f64(delay)
    }
}

/// The same delay before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}
