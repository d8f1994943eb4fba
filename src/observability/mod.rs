//! Logs and metrics for the orchestrator.
//!
//! # Data Flow
//! ```text
//! worker / pool / manager
//!     → logging.rs  tracing events keyed by worker_id and request_id
//!     → metrics.rs  request latency, pool size, breaker transitions
//!
//! Read by:
//!     → stdout (fmt subscriber)
//!     → Prometheus scrape on the configured metrics address
//! ```
//!
//! # Design Decisions
//! - Every state transition logs both ends (`from`, `to`)
//! - Recording a metric is an atomic update; no locks on the request path

pub mod logging;
pub mod metrics;
