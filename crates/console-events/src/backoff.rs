//! Restart backoff for supervised loops.
//!
//! The discovery supervisor asks a [`RestartPolicy`] how long to pause
//! before reconnecting. [`BackoffPolicy`] covers the fixed pause used in
//! production and an exponential preset for noisier environments.

use std::fmt::Debug;
use std::time::Duration;

/// Decides the pause before restart attempt `attempt` (1-based).
pub trait RestartPolicy: Send + Sync + Debug {
    /// Delay before the given attempt.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff capped at `max_delay`. A base of 1.0 gives a fixed
/// pause.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart
    pub initial_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Growth factor per attempt
    pub exponential_base: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl BackoffPolicy {
    /// The same pause before every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            exponential_base: 1.0,
        }
    }

    /// Doubling from 1s up to 60s.
    pub fn exponential() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl RestartPolicy for BackoffPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}
