//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether a failed request may be retried
//! - Compute the delay before the retry
//!
//! # Design Decisions
//! - At most one retry, always on a different eligible worker
//! - Only transient failures (synthesis failure, timeout, open circuit) retry
//! - Validation, capacity and protocol errors surface immediately

use std::time::Duration;

use crate::config::RequestConfig;
use crate::error::OrchestratorError;
use crate::resilience::backoff::calculate_backoff;

/// Attempts allowed per request, the first one included.
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(config: &RequestConfig) -> Self {
        Self {
            enabled: config.retry_enabled,
            base_delay_ms: config.retry_base_delay_ms,
        }
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, err: &OrchestratorError, attempt: u32) -> bool {
        self.enabled && attempt < MAX_ATTEMPTS && err.is_retryable()
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.base_delay_ms.saturating_mul(4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_retry_for_transient_errors() {
        let policy = RetryPolicy::new(&RequestConfig::default());
        let err = OrchestratorError::SynthesisFailed("engine crashed".into());
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&OrchestratorError::QueueFull(10), 1));
    }

    #[test]
    fn test_disabled() {
        let config = RequestConfig {
            retry_enabled: false,
            ..Default::default()
        };
        let policy = RetryPolicy::new(&config);
        assert!(!policy.should_retry(&OrchestratorError::Timeout(5), 1));
    }
}
