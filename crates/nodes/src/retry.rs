//! Retry schedule for transient provider failures.

use std::time::Duration;

use pipeline::{ChainConfig, RetryPolicy};

/// Exponential back-off bounded by a total attempt count.
///
/// Combines the attempt bound and back-off curve from [`ChainConfig`] with the
/// retryable-error predicate carried by each error's [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    max_attempts: u32,
    initial: Duration,
    multiplier: u32,
    max: Duration,
}

impl RetrySchedule {
    pub fn new(max_attempts: u32, initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial,
            multiplier: multiplier.max(1),
            max,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff(),
            config.backoff_multiplier,
            config.max_backoff(),
        )
    }

    /// Total attempts allowed, the first call included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Back-off before retry number `retry` (1-based), capped at the maximum.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Decides whether to retry after `failures` transient failures.
    ///
    /// Returns the delay to wait, or `None` when the policy forbids retrying or
    /// the attempt budget is spent. A server-suggested delay longer than the
    /// computed back-off wins, still capped at the maximum.
    pub fn next_delay(&self, policy: &RetryPolicy, failures: u32) -> Option<Duration> {
        let RetryPolicy::Retryable { after } = policy else {
            return None;
        };
        if failures >= self.max_attempts {
            return None;
        }
        let backoff = self.backoff(failures);
        let delay = after.map_or(backoff, |hint| hint.max(backoff));
        Some(delay.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> RetrySchedule {
        RetrySchedule::new(3, Duration::from_secs(1), 2, Duration::from_secs(30))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let s = schedule();
        assert_eq!(s.backoff(1), Duration::from_secs(1));
        assert_eq!(s.backoff(2), Duration::from_secs(2));
        assert_eq!(s.backoff(3), Duration::from_secs(4));
        assert_eq!(s.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn retries_stop_after_the_attempt_budget() {
        let s = schedule();
        let transient = RetryPolicy::Retryable { after: None };
        assert_eq!(s.next_delay(&transient, 1), Some(Duration::from_secs(1)));
        assert_eq!(s.next_delay(&transient, 2), Some(Duration::from_secs(2)));
        assert_eq!(s.next_delay(&transient, 3), None);
    }

    #[test]
    fn non_retryable_errors_never_retry() {
        assert_eq!(schedule().next_delay(&RetryPolicy::NonRetryable, 1), None);
    }

    #[test]
    fn server_hints_extend_the_delay_up_to_the_cap() {
        let s = schedule();
        let hinted = |secs| RetryPolicy::Retryable {
            after: Some(Duration::from_secs(secs)),
        };
        assert_eq!(s.next_delay(&hinted(5), 1), Some(Duration::from_secs(5)));
        assert_eq!(s.next_delay(&hinted(0), 2), Some(Duration::from_secs(2)));
        assert_eq!(s.next_delay(&hinted(120), 1), Some(Duration::from_secs(30)));
    }

    #[test]
    fn defaults_follow_the_chain_configuration() {
        let s = RetrySchedule::from_config(&ChainConfig::default());
        assert_eq!(s.max_attempts(), 3);
        assert_eq!(s.backoff(1), Duration::from_secs(1));
    }
}
