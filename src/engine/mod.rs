//! Synthesis engine collaborator.
//!
//! # Responsibilities
//! - Define the contract every worker's engine fulfils
//! - Create one engine instance per worker (optionally bound to a model tag)
//!
//! # Data Flow
//! ```text
//! PoolManager spawns worker
//!     → EngineFactory::create(worker_id, model)
//!     → SynthesisEngine::initialize
//! Worker::run
//!     → SynthesisEngine::run(job) → EngineOutput | EngineError
//! HealthMonitor probe
//!     → SynthesisEngine::health_ping
//! ```
//!
//! # Design Decisions
//! - Engines are opaque; the orchestrator never inspects audio
//! - Methods take `&self` so probes and shutdown can reach a running engine
//! - Dropping an engine must release its process

pub mod process;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub use process::{ProcessEngine, ProcessEngineFactory};

/// Errors reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine failed to initialize: {0}")]
    Initialization(String),

    #[error("{0}")]
    ModelNotFound(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("malformed engine reply: {0}")]
    Protocol(String),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit of synthesis work handed to an engine.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisJob {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_target: Option<String>,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    /// Where the audio was written.
    pub output_target: Option<String>,
    /// Audio duration reported by the engine.
    pub duration_ms: Option<u64>,
}

#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Load models and become ready to serve.
    async fn initialize(&self) -> Result<(), EngineError>;

    async fn run(&self, job: &SynthesisJob) -> Result<EngineOutput, EngineError>;

    /// Cheap liveness check used by the health monitor.
    async fn health_ping(&self) -> Result<(), EngineError>;

    /// Release the engine. Must be safe to call more than once.
    async fn shutdown(&self);
}

/// Builds engines for new and restarted workers.
pub trait EngineFactory: Send + Sync {
    fn create(&self, worker_id: u64, model: Option<&str>) -> Arc<dyn SynthesisEngine>;

    /// Model tags the engines can serve. Empty means any tag is accepted.
    fn models(&self) -> Vec<String>;
}
