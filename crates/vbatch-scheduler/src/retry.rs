//! Retry backoff policy.
//!
//! The retry decision itself lives in the unit pipeline (it depends on the
//! per-unit budget and the failure classification); this module only
//! computes capped exponential delays.

use std::time::Duration;

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Base delay (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before re-attempting after `retry_count` retries:
    /// `base * 2^retry_count`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        // Past 2^16 the cap always wins; avoids shift overflow.
        let factor = 1u32 << retry_count.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(60));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(63), Duration::from_secs(60));
    }
}
