use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fixed-delay retry budget: `max_attempts` tries with the same pause between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedRetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for FixedRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl FixedRetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delay to wait after `attempts` failed tries, or `None` once the budget is spent.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }

    /// Lower bound on the wall time a fully exhausted budget takes.
    pub fn minimum_exhaustion_time(&self) -> Duration {
        self.delay
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}
