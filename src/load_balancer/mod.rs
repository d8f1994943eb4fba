//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request admitted → RequestProfile (model tag, priority)
//!     → pool registry lock taken
//!     → eligible workers snapshotted (READY, breaker admits traffic)
//!     → scoring.rs (pick highest score, deterministic tie-break)
//!     → worker reserved (READY → BUSY) under the same lock
//!     → none eligible: queue.rs (bounded priority queue, FIFO per tier)
//! Worker becomes READY:
//!     → oldest highest-priority waiter matched to best eligible worker
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless; the pool owns workers and the queue
//! - Scoring is a pure function over snapshots, so it is testable alone
//! - Open-circuit and non-READY workers are excluded from selection

pub mod queue;
pub mod scoring;

use serde::Serialize;

use crate::request::Priority;

pub use queue::{PriorityQueue, QueueTicket};
pub use scoring::ScoringBalancer;

/// What the balancer needs to know about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestProfile {
    pub model: Option<String>,
    pub priority: Priority,
}

/// Point-in-time view of a selectable worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: u64,
    pub queue_depth: usize,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub model: Option<String>,
}

/// Worker selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick a worker among already-eligible candidates.
    fn select(&self, candidates: &[WorkerSnapshot], profile: &RequestProfile) -> Option<u64>;
}
