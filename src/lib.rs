//! Fault-tolerant orchestration for a pool of speech-synthesis workers.
//!
//! ```text
//!     Caller ──▶ api ──▶ manager::Orchestrator ──▶ protocol (negotiate/adapt)
//!                              │
//!                              ▼
//!                        pool::PoolManager ──▶ load_balancer (score + queue)
//!                              │
//!                              ▼
//!                     worker::Worker ──▶ resilience::CircuitBreaker ──▶ engine
//!                              ▲
//!                              └── health::HealthMonitor (probes)
//! ```

// Core subsystems
pub mod config;
pub mod engine;
pub mod error;
pub mod request;

// Workers and scheduling
pub mod health;
pub mod load_balancer;
pub mod pool;
pub mod worker;

// Front
pub mod api;
pub mod cache;
pub mod manager;
pub mod protocol;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use lifecycle::Shutdown;
pub use manager::Orchestrator;
pub use request::{Priority, SynthesisRequest, SynthesisResult};
