//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → Orchestrator::start → API listener
//!
//! Shutdown:
//!     signals.rs (SIGTERM/SIGINT)
//!     → API stops accepting
//!     → Orchestrator::shutdown: stop admission, drain, stop loops (shutdown.rs), stop workers
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, drain, close
//! - Draining is bounded by `pool.drain_grace_ms`; remaining work is cancelled

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
