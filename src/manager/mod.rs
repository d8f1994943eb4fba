//! Manager façade: the single entry point callers use.
//!
//! # Design Decisions
//! - The manager owns the pool; workers report back only through events
//! - Every request ends in a `SynthesisResult`, success or not
//! - Shutdown is ordered: stop admission, drain, stop loops, stop workers

pub mod orchestrator;
pub mod status;

pub use orchestrator::Orchestrator;
pub use status::{OrchestratorStatus, PoolStatus, RequestStats};
