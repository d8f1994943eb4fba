//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to worker:
//!     → circuit_breaker.rs (fast-fail known-bad workers, track outcomes)
//!     → timeouts.rs (enforce per-request deadline, cancel on expiry)
//!     → On failure: retries.rs (one retry on a different worker)
//! Restart / scaling failures:
//!     → backoff.rs (exponential pause with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every engine call has a deadline
//! - Circuit breaker prevents hammering a failing worker
//! - Backoff prevents restart storms when every worker is failing

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::{calculate_backoff, BackoffGate};
pub use circuit_breaker::{BreakerSnapshot, BreakerState, CallPermit, CircuitBreaker};
pub use retries::RetryPolicy;
pub use timeouts::with_deadline;
