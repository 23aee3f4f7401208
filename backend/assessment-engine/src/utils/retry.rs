use std::time::Duration;

use crate::config::SubmissionConfig;
use crate::models::SubmissionOutcome;

/// Retry budget for one finalization: how many network tries and how long
/// to back off between them. Deterministic on purpose, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&SubmissionConfig> for RetryPolicy {
    fn from(cfg: &SubmissionConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Decide what to do after `attempt_number` (1-based) ended with `last`.
    pub fn next(&self, attempt_number: u32, last: &SubmissionOutcome) -> RetryDecision {
        if !matches!(last, SubmissionOutcome::RetryableFailure(_)) {
            return RetryDecision::GiveUp;
        }
        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_before(attempt_number + 1),
        }
    }

    /// Backoff before attempt `n`: `base * 2^(n-2)` for n >= 2, zero for the first.
    pub fn delay_before(&self, attempt_number: u32) -> Duration {
        if attempt_number < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt_number - 2).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubmissionError;
    use crate::models::GradingResult;

    fn retryable() -> SubmissionOutcome {
        SubmissionOutcome::RetryableFailure(SubmissionError::Network("reset".to_string()))
    }

    #[test]
    fn retries_transient_failures_with_doubling_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        assert_eq!(
            policy.next(1, &retryable()),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.next(2, &retryable()),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.next(3, &retryable()), RetryDecision::GiveUp);
    }

    #[test]
    fn never_retries_fatal_or_success() {
        let policy = RetryPolicy::default();
        let fatal = SubmissionOutcome::FatalFailure(SubmissionError::Rejected {
            status: 422,
            message: "bad".to_string(),
        });

        assert_eq!(policy.next(1, &fatal), RetryDecision::GiveUp);
        assert_eq!(
            policy.next(1, &SubmissionOutcome::Success(GradingResult::default())),
            RetryDecision::GiveUp
        );
        assert_eq!(policy.next(1, &SubmissionOutcome::Cancelled), RetryDecision::GiveUp);
    }

    #[test]
    fn attempt_count_never_exceeds_budget() {
        for max_attempts in 1..=6 {
            let policy = RetryPolicy::new(max_attempts, Duration::from_millis(1));
            let mut attempts = 1;
            while let RetryDecision::Retry { .. } = policy.next(attempts, &retryable()) {
                attempts += 1;
            }
            assert_eq!(attempts, max_attempts);
        }
    }

    #[test]
    fn delay_formula_matches_exponential_backoff() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        for n in 2..=10u32 {
            assert_eq!(policy.delay_before(n), Duration::from_secs(1 << (n - 2)));
        }
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_before(200), Duration::MAX);
    }
}
