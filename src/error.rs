//! Error taxonomy surfaced by the orchestrator.
//!
//! Every failure a caller can observe maps to one [`OrchestratorError`]
//! variant with a stable wire code. Engine-level failures are converted at the
//! worker boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineError;

/// Errors returned by the orchestration layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// A worker's engine could not be started.
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The requested voice/model tag is not served by any engine.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The engine reported a synthesis failure.
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// The per-request deadline elapsed.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// No worker can serve traffic and restarts keep failing.
    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    /// The request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The worker's circuit breaker rejected the call.
    #[error("Circuit open for worker {0}")]
    CircuitOpen(u64),

    /// The pending-request queue is at capacity.
    #[error("Queue full ({0} pending requests)")]
    QueueFull(usize),

    /// No mutually supported protocol version exists.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    /// The manager no longer admits requests.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InitializationFailed(_) => "INITIALIZATION_FAILED",
            Self::ModelNotFound(_) => "MODEL_NOT_FOUND",
            Self::SynthesisFailed(_) => "SYNTHESIS_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::QueueFull(_) => "QUEUE_FULL",
            Self::UnsupportedProtocolVersion(_) => "UNSUPPORTED_PROTOCOL_VERSION",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Whether the manager may retry the request on another worker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SynthesisFailed(_) | Self::Timeout(_) | Self::CircuitOpen(_)
        )
    }

    /// Whether this outcome counts against a worker's breaker and health.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, Self::SynthesisFailed(_) | Self::Timeout(_))
    }

    /// Wire representation used in result and error envelopes.
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<EngineError> for OrchestratorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Initialization(msg) => Self::InitializationFailed(msg),
            EngineError::ModelNotFound(model) => Self::ModelNotFound(model),
            other => Self::SynthesisFailed(other.to_string()),
        }
    }
}

/// `{ code, message, retryable }` block of a result envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(OrchestratorError::QueueFull(3).code(), "QUEUE_FULL");
        assert_eq!(OrchestratorError::CircuitOpen(1).code(), "CIRCUIT_OPEN");
        assert_eq!(
            OrchestratorError::UnsupportedProtocolVersion("9".into()).code(),
            "UNSUPPORTED_PROTOCOL_VERSION"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(OrchestratorError::Timeout(100).is_retryable());
        assert!(OrchestratorError::CircuitOpen(2).is_retryable());
        assert!(!OrchestratorError::InvalidRequest("x".into()).is_retryable());
        assert!(!OrchestratorError::QueueFull(1).is_retryable());
        assert!(!OrchestratorError::CircuitOpen(2).is_worker_fault());
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: OrchestratorError = EngineError::ModelNotFound("vits".into()).into();
        assert_eq!(err, OrchestratorError::ModelNotFound("vits".into()));

        let err: OrchestratorError = EngineError::Synthesis("boom".into()).into();
        assert_eq!(err.code(), "SYNTHESIS_FAILED");
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::Timeout(250);
        assert_eq!(err.to_string(), "Request timed out after 250 ms");
        assert_eq!(err.to_info().code, "TIMEOUT");
    }
}
