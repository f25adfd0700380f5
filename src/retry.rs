use std::time::Duration;

/// Exponential backoff for reconnecting a live stream.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect number `attempt` (zero based), or `None` once
    /// the budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let scale = self.factor.max(1).checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.checked_mul(scale).unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}
