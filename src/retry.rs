use std::time::Duration;

/// How the pause after a failed attempt grows with the retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `base_delay`.
    Fixed,
    /// `base_delay * 2^retry_count`, never longer than `cap`.
    Exponential { cap: Duration },
}

/// Retry budget and pacing for one trigger path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: i64,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(base_delay: Duration, max_retries: i64) -> Self {
        Self {
            base_delay,
            max_retries,
            backoff: Backoff::Fixed,
        }
    }

    /// True while a record with `retry_count` failures may be attempted again.
    pub fn allows_attempt(&self, retry_count: i64) -> bool {
        retry_count < self.max_retries
    }

    /// True once `retry_count` failures exhaust the budget.
    pub fn is_exhausted(&self, retry_count: i64) -> bool {
        retry_count >= self.max_retries
    }

    /// Pause inserted before the next record after a successful attempt.
    pub fn delay_after_success(&self) -> Duration {
        self.base_delay
    }

    /// Pause inserted before the next record after the `retry_count`-th failure.
    pub fn delay_after_failure(&self, retry_count: i64) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential { cap } => {
                let shift = retry_count.clamp(0, 16) as u32;
                let delay = self.base_delay.saturating_mul(1_u32 << shift);
                delay.min(cap.max(self.base_delay))
            }
        }
    }
}
