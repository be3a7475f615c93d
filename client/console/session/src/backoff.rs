//! Reconnect scheduling with exponential backoff.

use std::time::Duration;

/// Retry policy applied to every link.
///
/// One capped policy covers all connection classes; links that exhaust the
/// cap park in the error state until the caller reconnects explicitly.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Base delay multiplied by `2^attempt`
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Attempts before giving up permanently
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Per-link retry bookkeeping.
///
/// Exactly one schedule lives inside each link driver task, which is what
/// guarantees at most one pending retry per link at any time.
#[derive(Debug)]
pub struct ReconnectSchedule {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectSchedule {
    /// Create a fresh schedule with zero attempts recorded
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` once the cap is reached.
    ///
    /// The attempt counter is incremented before the delay is computed, so
    /// the first retry waits `base_delay * 2`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self
            .policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.max_delay);
        Some(delay.min(self.policy.max_delay))
    }

    /// Attempts consumed so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempt cap from the policy
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Clear the attempt counter after a successful open
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_cap() {
        let mut schedule = ReconnectSchedule::new(ReconnectPolicy::default());

        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(8)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(16)));
        // 2^5 = 32s exceeds the 30s cap
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(30)));
        // Cap of 5 attempts reached
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.attempts(), 5);
    }

    #[test]
    fn test_reset_restores_full_budget() {
        let mut schedule = ReconnectSchedule::new(ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            max_attempts: 3,
        });

        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        schedule.reset();
        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_large_attempt_counts_saturate() {
        let mut schedule = ReconnectSchedule::new(ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 64,
        });

        let mut last = Duration::ZERO;
        for _ in 0..64 {
            last = schedule.next_delay().unwrap();
        }
        assert_eq!(last, Duration::from_secs(30));
        assert_eq!(schedule.next_delay(), None);
    }
}
