//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (monitor.rs):
//!     Periodic timer
//!     → Probe each READY / starting worker in its own task
//!     → Update record.rs
//!     → INITIALIZING → READY on success, READY → UNHEALTHY past threshold
//!
//! Passive health checks (worker request path):
//!     Request outcome observed
//!     → record.rs updated (timeouts and failures count)
//!     → Worker ends the request UNHEALTHY if threshold exceeded
//!
//! UNHEALTHY worker:
//!     → WorkerEvent → PoolManager restart (with backoff)
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Health state is per-worker; probes never block request callers
//! - Score blends success rate, failure streak, latency and staleness

pub mod monitor;
pub mod record;

pub use monitor::{apply_probe, HealthMonitor, WorkerDirectory};
pub use record::{HealthRecord, HealthSnapshot};
