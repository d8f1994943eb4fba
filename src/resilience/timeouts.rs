//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap worker calls with a deadline
//! - Tie each call to a cancellation token
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities
//! - Timeout errors are distinct from other errors
//! - Cancellation from outside (forced shutdown) surfaces as `ShuttingDown`

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Run `fut` until it completes, `timeout` elapses, or `token` is cancelled.
///
/// On timeout the token is cancelled so that whatever is driving the call can
/// observe the abandonment.
pub async fn with_deadline<F, T>(
    timeout: Duration,
    token: &CancellationToken,
    fut: F,
) -> OrchestratorResult<T>
where
    F: Future<Output = OrchestratorResult<T>>,
{
    tokio::select! {
        res = fut => res,
        _ = tokio::time::sleep(timeout) => {
            token.cancel();
            Err(OrchestratorError::Timeout(timeout.as_millis() as u64))
        }
        _ = token.cancelled() => Err(OrchestratorError::ShuttingDown),
    }
}
