//! Watchdog configuration.

use std::time::Duration;

/// Spacing between retries of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same interval every time.
    Fixed { interval: Duration },
    /// `base`, doubling per attempt, never more than `max`.
    CappedExponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed { interval } => interval,
            RetryPolicy::CappedExponential { base, max } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::CappedExponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

/// Configuration for the watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub retry_policy: RetryPolicy,

    /// Failures tolerated per operation before it is reported as a fatal
    /// anomaly.
    pub max_retries: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            max_retries: 10,
        }
    }
}

impl WatchdogConfig {
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_exponential_delays() {
        let policy = RetryPolicy::CappedExponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::Fixed {
            interval: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(1), policy.delay(7));
    }
}
