//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (bounds ordered, thresholds in range, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: OrchestratorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::OrchestratorConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &OrchestratorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, field: &'static str, message: &str| {
        if !ok {
            errors.push(ValidationError {
                field,
                message: message.to_string(),
            });
        }
    };

    let pool = &config.pool;
    check(pool.max_workers >= 1, "pool.max_workers", "must be at least 1");
    check(
        pool.min_workers <= pool.max_workers,
        "pool.min_workers",
        "must not exceed pool.max_workers",
    );
    check(pool.scaling_interval_ms > 0, "pool.scaling_interval_ms", "must be > 0");
    check(
        pool.low_latency_threshold_ms <= pool.target_latency_ms,
        "pool.low_latency_threshold_ms",
        "must not exceed pool.target_latency_ms",
    );
    check(
        pool.restart_backoff_base_ms <= pool.restart_backoff_max_ms,
        "pool.restart_backoff_base_ms",
        "must not exceed pool.restart_backoff_max_ms",
    );
    check(
        pool.exhausted_after_restart_failures >= 1,
        "pool.exhausted_after_restart_failures",
        "must be at least 1",
    );

    let cb = &config.circuit_breaker;
    check(
        cb.failure_threshold > 0.0 && cb.failure_threshold <= 1.0,
        "circuit_breaker.failure_threshold",
        "must be in (0.0, 1.0]",
    );
    check(
        cb.sliding_window_size >= 1,
        "circuit_breaker.sliding_window_size",
        "must be at least 1",
    );
    check(
        cb.minimum_calls >= 1 && cb.minimum_calls <= cb.sliding_window_size,
        "circuit_breaker.minimum_calls",
        "must be in 1..=sliding_window_size",
    );
    check(
        cb.success_threshold >= 1,
        "circuit_breaker.success_threshold",
        "must be at least 1",
    );

    let health = &config.health_check;
    check(health.interval_ms > 0, "health_check.interval_ms", "must be > 0");
    check(health.timeout_ms > 0, "health_check.timeout_ms", "must be > 0");
    check(
        health.unhealthy_threshold >= 1,
        "health_check.unhealthy_threshold",
        "must be at least 1",
    );
    check(
        health.response_window >= 1,
        "health_check.response_window",
        "must be at least 1",
    );

    check(config.request.timeout_ms > 0, "request.timeout_ms", "must be > 0");
    check(
        config.request.max_text_length > 0,
        "request.max_text_length",
        "must be > 0",
    );
    check(
        !config.cache.enabled || config.cache.max_entries > 0,
        "cache.max_entries",
        "must be > 0 when the cache is enabled",
    );
    check(
        !config.engine.command.trim().is_empty(),
        "engine.command",
        "must not be empty",
    );
    check(
        !config.api.enabled || config.api.bind_address.parse::<std::net::SocketAddr>().is_ok(),
        "api.bind_address",
        "must be a socket address",
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = OrchestratorConfig::default();
        config.pool.min_workers = 5;
        config.pool.max_workers = 2;
        config.circuit_breaker.failure_threshold = 1.5;
        config.health_check.interval_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"pool.min_workers"));
        assert!(fields.contains(&"circuit_breaker.failure_threshold"));
        assert!(fields.contains(&"health_check.interval_ms"));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_minimum_calls_bounded_by_window() {
        let mut config = OrchestratorConfig::default();
        config.circuit_breaker.minimum_calls = 20;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "circuit_breaker.minimum_calls");
    }
}
