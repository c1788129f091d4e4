use std::time::Duration;

pub const DEFAULT_RETRY_WAIT_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_WAIT_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_MAX: usize = 4;

/// Retry bounds shared by every call made through a [`Client`](crate::Client).
///
/// `retry_max` counts retries, so up to `retry_max + 1` attempts are made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub retry_wait_min: Duration,
    pub retry_wait_max: Duration,
    pub retry_max: usize,
}

impl RetryConfig {
    pub fn with_retry_wait_min(mut self, retry_wait_min: Duration) -> Self {
        self.retry_wait_min = retry_wait_min;
        self
    }

    pub fn with_retry_wait_max(mut self, retry_wait_max: Duration) -> Self {
        self.retry_wait_max = retry_wait_max;
        self
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.retry_max.saturating_add(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_wait_min: DEFAULT_RETRY_WAIT_MIN,
            retry_wait_max: DEFAULT_RETRY_WAIT_MAX,
            retry_max: DEFAULT_RETRY_MAX,
        }
    }
}
