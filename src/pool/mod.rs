//! Worker pool subsystem.
//!
//! # Data Flow
//! ```text
//! Scaling tick (every scaling_interval_ms):
//!     → manager.rs collects load (queue depth, latency, idle time)
//!     → scaler.rs decides ScaleUp / ScaleDown / NoChange
//!     → manager.rs spawns or retires one worker
//!
//! Worker UNHEALTHY:
//!     → manager.rs restarts it in the background with backoff
//! ```
//!
//! # Design Decisions
//! - Pool size always within [min_workers, max_workers]
//! - One scaling decision in flight at a time
//! - New workers become selectable only after a successful probe

pub mod manager;
pub mod scaler;

pub use manager::{Acquisition, PoolManager};
pub use scaler::{Scaler, ScalingDecision, ScalingInputs};
