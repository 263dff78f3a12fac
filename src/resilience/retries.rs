//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed upstream attempt is retryable
//! - Bound the number of attempts per operation
//! - Provide the fixed inter-attempt delay
//!
//! # Design Decisions
//! - Connection errors always retryable; 5xx only for the configured subset
//! - Aborts and timeouts are never retried
//! - Fixed delay, no jitter: one relay talks to one upstream

use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::RelayError;

/// Check whether an upstream outcome warrants another attempt.
pub fn is_retryable(status: Option<u16>, network_error: bool, retryable_statuses: &[u16]) -> bool {
    if network_error {
        return true;
    }
    status.is_some_and(|s| retryable_statuses.contains(&s))
}

/// Attempt budget and delay for one operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, retryable_statuses: Vec<u16>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retryable_statuses,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_delay(),
            config.retryable_statuses.clone(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether `attempt` (1-based) failing with `err` should be followed by another.
    pub fn should_retry(&self, attempt: u32, err: &RelayError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match err {
            RelayError::Network(_) => is_retryable(None, true, &self.retryable_statuses),
            RelayError::Upstream { status, .. } => {
                is_retryable(Some(*status), false, &self.retryable_statuses)
            }
            RelayError::Timeout(_) | RelayError::Aborted | RelayError::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn upstream(status: u16) -> RelayError {
        RelayError::Upstream {
            status,
            reason: String::new(),
            body: String::new(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&UpstreamConfig::default())
    }

    #[test]
    fn test_server_errors_retryable() {
        let policy = policy();
        for status in [500, 502, 503, 504] {
            assert!(policy.should_retry(1, &upstream(status)), "{status}");
        }
        assert!(!policy.should_retry(1, &upstream(400)));
        assert!(!policy.should_retry(1, &upstream(429)));
        assert!(!policy.should_retry(1, &upstream(501)));
    }

    #[test]
    fn test_network_errors_retryable() {
        let err = RelayError::Network(TransportError("connection reset".into()));
        assert!(policy().should_retry(2, &err));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = policy();
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(2, &upstream(503)));
        assert!(!policy.should_retry(3, &upstream(503)));
    }

    #[test]
    fn test_abort_and_timeout_never_retried() {
        let policy = policy();
        assert!(!policy.should_retry(1, &RelayError::Aborted));
        assert!(!policy.should_retry(1, &RelayError::Timeout(600)));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(0, Duration::ZERO, vec![]);
        assert_eq!(policy.max_attempts(), 1);
    }
}
