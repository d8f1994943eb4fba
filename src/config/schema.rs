//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the orchestrator.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker pool sizing and scaling.
    pub pool: PoolConfig,

    /// Per-worker circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Health probe settings.
    pub health_check: HealthCheckConfig,

    /// Pending-request queue settings.
    pub queue: QueueConfig,

    /// Per-request limits, timeout and retry.
    pub request: RequestConfig,

    /// Result cache settings.
    pub cache: CacheConfig,

    /// Synthesis engine process settings.
    pub engine: EngineConfig,

    /// HTTP API settings.
    pub api: ApiConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Lower bound on pool size.
    pub min_workers: usize,

    /// Upper bound on pool size.
    pub max_workers: usize,

    /// Scale up when more requests than this are queued.
    pub scale_up_threshold: usize,

    /// A READY worker idle longer than this may be removed.
    pub scale_down_idle_threshold_ms: u64,

    /// Scale up when average latency exceeds this.
    pub target_latency_ms: u64,

    /// Scale down only while average latency is below this.
    pub low_latency_threshold_ms: u64,

    /// Interval between scaling evaluations.
    pub scaling_interval_ms: u64,

    /// Assign new workers the most requested model tag.
    pub model_specialization: bool,

    /// Model tag for workers when no demand has been observed.
    pub default_model: Option<String>,

    /// How long a retiring worker may finish in-flight work.
    pub drain_grace_ms: u64,

    /// Base delay for restart / spawn backoff.
    pub restart_backoff_base_ms: u64,

    /// Cap for restart / spawn backoff.
    pub restart_backoff_max_ms: u64,

    /// Consecutive failed restarts after which a worker counts as exhausted.
    pub exhausted_after_restart_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            scale_up_threshold: 5,
            scale_down_idle_threshold_ms: 60_000,
            target_latency_ms: 2_000,
            low_latency_threshold_ms: 500,
            scaling_interval_ms: 5_000,
            model_specialization: false,
            default_model: None,
            drain_grace_ms: 5_000,
            restart_backoff_base_ms: 1_000,
            restart_backoff_max_ms: 60_000,
            exhausted_after_restart_failures: 3,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0..=1.0) within the window that opens the circuit.
    pub failure_threshold: f64,

    /// Number of recent outcomes kept in the sliding window.
    pub sliding_window_size: usize,

    /// Outcomes required in the window before the rate is evaluated.
    pub minimum_calls: usize,

    /// Time the circuit stays open before a trial call is allowed.
    pub reset_timeout_ms: u64,

    /// Successful trials required to close a half-open circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            sliding_window_size: 10,
            minimum_calls: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the periodic probe loop.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of recent probe samples kept for scoring.
    pub response_window: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 2_000,
            unhealthy_threshold: 3,
            response_window: 20,
        }
    }
}

/// Pending-request queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of requests waiting for a worker.
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_queue_size: 100 }
    }
}

/// Per-request configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Deadline for a whole `synthesize` call, queueing included.
    pub timeout_ms: u64,

    /// Maximum text length in characters.
    pub max_text_length: usize,

    /// Maximum serialized size of request metadata.
    pub max_metadata_bytes: usize,

    /// Retry once on a different worker after a retryable failure.
    pub retry_enabled: bool,

    /// Base delay before the retry.
    pub retry_base_delay_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_text_length: 10_000,
            max_metadata_bytes: 16 * 1024,
            retry_enabled: true,
            retry_base_delay_ms: 50,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 500,
            ttl_secs: 3_600,
        }
    }
}

/// Synthesis engine process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable spawned once per worker.
    pub command: String,

    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Extra environment for the engine process.
    pub env: HashMap<String, String>,

    /// Model tags the engine can serve (empty = accept any).
    pub models: Vec<String>,

    /// Deadline for engine initialization.
    pub init_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "synth-engine".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            models: Vec::new(),
            init_timeout_ms: 30_000,
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Serve the HTTP API.
    pub enabled: bool,

    /// Bind address (e.g., "127.0.0.1:8090").
    pub bind_address: String,

    /// API key for admin routes (Bearer token).
    pub api_key: String,

    /// Timeout applied to every HTTP request.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8090".to_string(),
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.pool.min_workers, 1);
        assert_eq!(config.circuit_breaker.sliding_window_size, 10);
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
[pool]
max_workers = 8
model_specialization = true

[circuit_breaker]
failure_threshold = 0.25
"#,
        )
        .unwrap();
        assert_eq!(config.pool.max_workers, 8);
        assert_eq!(config.pool.min_workers, 1);
        assert!(config.pool.model_specialization);
        assert_eq!(config.circuit_breaker.failure_threshold, 0.25);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.queue.max_queue_size, 100);
    }
}
