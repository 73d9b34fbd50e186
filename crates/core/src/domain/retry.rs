// Retry policy: one shared object instead of per-worker constants
use crate::domain::job::DEFAULT_MAX_ATTEMPTS;
use std::time::Duration;

/// Default base delay before the first retry (5s)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Default exponential growth factor
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound on a single backoff delay (1h)
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60 * 60);

/// Retry decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back to pending, eligible again after the delay
    Retry(Duration),
    /// Resolve the job as failed, no further automatic retry
    Fail,
}

/// Retry policy
///
/// Backoff formula:
/// `delay = base_delay * factor ^ (attempts - 1)`, capped at `max_delay`,
/// where `attempts` is the claim counter after the failing claim (>= 1).
/// With the defaults this yields 5s, 10s, 20s, 40s, 80s, 160s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub default_max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(Duration::from_secs(5), 2.0);
    /// ```
    pub fn new(base_delay: Duration, factor: f64) -> Self {
        Self {
            base_delay,
            factor,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Backoff delay after the given (post-claim) attempt number
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        let exponent = (attempts - 1).max(0);
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Decide what happens to a job whose handler just failed
    ///
    /// Returns:
    /// - `RetryDecision::Retry(delay)` if the error is retryable and attempts remain
    /// - `RetryDecision::Fail` otherwise
    pub fn decide(&self, attempts: i32, max_attempts: i32, retryable: bool) -> RetryDecision {
        if retryable && attempts < max_attempts {
            RetryDecision::Retry(self.backoff_delay(attempts))
        } else {
            RetryDecision::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_sequence() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.backoff_delay(attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(500), Duration::from_secs(60));
    }

    #[test]
    fn test_decide_retries_until_last_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, 6, true),
            RetryDecision::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(5, 6, true),
            RetryDecision::Retry(Duration::from_secs(80))
        );
        assert_eq!(policy.decide(6, 6, true), RetryDecision::Fail);
    }

    #[test]
    fn test_decide_never_retries_permanent_errors() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1, 6, false), RetryDecision::Fail);
    }
}
