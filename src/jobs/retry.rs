use std::time::Duration;

/// Bounded exponential backoff applied uniformly to every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt after `attempt`: `base × 2^(attempt−1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// How long terminal records of one status are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepPolicy {
    pub max_age: Duration,
    pub max_count: usize,
}

/// Pruning thresholds for terminal job records.
///
/// A record is removed once it is older than `max_age` or falls outside the
/// newest `max_count` records of its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub succeeded: KeepPolicy,
    pub failed: KeepPolicy,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            succeeded: KeepPolicy {
                max_age: Duration::from_secs(24 * 3600),
                max_count: 1000,
            },
            failed: KeepPolicy {
                max_age: Duration::from_secs(7 * 24 * 3600),
                max_count: 5000,
            },
        }
    }
}
