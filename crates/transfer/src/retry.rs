use std::time::Duration;

use rand::Rng;

/// Fraction of the backoff delay randomized in each direction.
const JITTER: f64 = 0.25;

/// Bounded exponential backoff for transient chunk failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per chunk, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the un-jittered wait.
    pub max_delay: Duration,
    /// Growth of the wait after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether a chunk that has failed `attempt` times may be sent again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before re-sending a chunk after its `attempt`-th failure.
    ///
    /// The backoff step is scaled by a random factor in `[0.75, 1.25]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
        Duration::from_secs_f64(self.backoff_step(attempt).as_secs_f64() * factor)
    }

    /// Un-jittered wait: `initial_delay * backoff_factor^(attempt - 1)`,
    /// never above `max_delay`.
    fn backoff_step(&self, attempt: u32) -> Duration {
        let retries_before = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let growth = self.backoff_factor.max(1.0).powi(retries_before);
        let secs = (self.initial_delay.as_secs_f64() * growth).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}
