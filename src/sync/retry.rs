//! Retry policy for failed sync cycles.

use std::time::Duration;

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial_delay * attempt`
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
}

/// When and how often a failed cycle is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Adds up to 25% random delay.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a linear policy with the given attempt limit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: Backoff::Linear,
            jitter: false,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 is the
    /// initial run and has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let initial = self.initial_delay.as_secs_f64();
        let base = match self.backoff {
            Backoff::Linear => initial * attempt as f64,
            Backoff::Exponential { multiplier } => {
                initial * multiplier.powi(attempt.saturating_sub(1) as i32)
            }
        };
        let max = self.max_delay.as_secs_f64();
        let delay_secs = if base.is_nan() { max } else { base.clamp(0.0, max) };

        if self.jitter {
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryPolicy {
    /// Linear backoff from 10 seconds, capped at 5 hours, 5 attempts.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(5 * 60 * 60),
            backoff: Backoff::Linear,
            jitter: false,
        }
    }
}
