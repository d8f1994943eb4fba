//! Circuit breaker for worker protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: worker assumed bad, calls fail fast
//! - Half-Open: a single trial call probes recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold within the sliding window
//! Open → Half-Open: first call after reset timeout (becomes the trial)
//! Half-Open → Closed: success_threshold trial successes (window cleared)
//! Half-Open → Open: trial fails (reset timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per worker, never shared
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in flight while Half-Open
//! - Timeouts count as failures; caller-side errors are ignored

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    window: VecDeque<Outcome>,
    failure_count: usize,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    half_open_successes: u32,
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: usize,
    pub window_len: usize,
    pub trial_in_flight: bool,
}

/// Per-worker circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    worker_id: u64,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(worker_id: u64, config: CircuitBreakerConfig) -> Self {
        Self {
            worker_id,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
                half_open_successes: 0,
            }),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            window_len: inner.window.len(),
            trial_in_flight: inner.trial_in_flight,
        }
    }

    /// Whether a call issued now would be let through. Does not transition.
    pub fn admits_traffic(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => !inner.trial_in_flight,
            BreakerState::Open => self.reset_elapsed(&inner),
        }
    }

    fn reset_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.reset_timeout())
            .unwrap_or(true)
    }

    /// Ask permission for a call. The permit must be resolved with the outcome.
    pub fn try_acquire(&self) -> OrchestratorResult<CallPermit<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                if !self.reset_elapsed(&inner) {
                    return Err(OrchestratorError::CircuitOpen(self.worker_id));
                }
                inner.half_open_successes = 0;
                self.transition(&mut inner, BreakerState::HalfOpen);
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(OrchestratorError::CircuitOpen(self.worker_id));
                }
                true
            }
        };
        if trial {
            inner.trial_in_flight = true;
        }
        Ok(CallPermit {
            breaker: self,
            trial,
            resolved: false,
        })
    }

    /// Run `call` through the breaker.
    ///
    /// Worker faults (synthesis failure, timeout) are recorded as failures; other
    /// errors leave the window untouched.
    pub async fn call<F, T>(&self, call: F) -> OrchestratorResult<T>
    where
        F: Future<Output = OrchestratorResult<T>>,
    {
        let permit = self.try_acquire()?;
        match call.await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                if err.is_worker_fault() {
                    permit.failure();
                } else {
                    permit.ignore();
                }
                Err(err)
            }
        }
    }

    fn record(&self, outcome: Outcome, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
            if inner.state != BreakerState::HalfOpen {
                return;
            }
            match outcome {
                Outcome::Success => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.success_threshold {
                        inner.window.clear();
                        inner.failure_count = 0;
                        inner.opened_at = None;
                        inner.half_open_successes = 0;
                        self.transition(&mut inner, BreakerState::Closed);
                    }
                }
                Outcome::Failure => {
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_successes = 0;
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            return;
        }

        // Late completions of calls admitted before the circuit opened do not
        // move the state machine.
        if inner.state != BreakerState::Closed {
            return;
        }

        inner.window.push_back(outcome);
        if outcome == Outcome::Failure {
            inner.failure_count += 1;
        }
        while inner.window.len() > self.config.sliding_window_size {
            if inner.window.pop_front() == Some(Outcome::Failure) {
                inner.failure_count -= 1;
            }
        }

        let len = inner.window.len();
        if len >= self.config.minimum_calls {
            let rate = inner.failure_count as f64 / len as f64;
            if rate >= self.config.failure_threshold {
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, BreakerState::Open);
            }
        }
    }

    fn release(&self, trial: bool) {
        if trial {
            self.lock().trial_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => tracing::warn!(
                worker_id = self.worker_id,
                from = from.as_str(),
                failures = inner.failure_count,
                window = inner.window.len(),
                "Circuit opened"
            ),
            _ => tracing::info!(
                worker_id = self.worker_id,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
        metrics::record_breaker_state(self.worker_id, to);
    }
}

/// Permission for one call through a [`CircuitBreaker`].
///
/// Dropping an unresolved trial permit counts as a failed trial.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record(Outcome::Success, self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record(Outcome::Failure, self.trial);
    }

    /// Release without recording an outcome.
    pub fn ignore(mut self) {
        self.resolved = true;
        self.breaker.release(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.record(Outcome::Failure, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(reset_ms: u64, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            sliding_window_size: 10,
            minimum_calls: 5,
            reset_timeout_ms: reset_ms,
            success_threshold,
        }
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().success();
    }

    #[test]
    fn test_opens_at_failure_rate() {
        let cb = CircuitBreaker::new(1, config(60_000, 1));
        for _ in 0..5 {
            succeed(&cb);
        }
        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), BreakerState::Closed);

        // 5 failures out of 10 calls
        fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);

        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err, OrchestratorError::CircuitOpen(1));
        assert!(!cb.admits_traffic());
    }

    #[test]
    fn test_minimum_calls_guard() {
        let cb = CircuitBreaker::new(1, config(60_000, 1));
        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_single_call_minimum_opens_on_first_failure() {
        let mut cfg = config(60_000, 1);
        cfg.minimum_calls = 1;
        let cb = CircuitBreaker::new(1, cfg);
        fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_window_slides() {
        let cb = CircuitBreaker::new(1, config(60_000, 1));
        for _ in 0..2 {
            fail(&cb);
        }
        for _ in 0..10 {
            succeed(&cb);
        }
        // Old failures have left the window.
        assert_eq!(cb.snapshot().failure_count, 0);
        assert_eq!(cb.snapshot().window_len, 10);
    }

    #[test]
    fn test_half_open_trial_closes() {
        let cb = CircuitBreaker::new(3, config(20, 1));
        for _ in 0..5 {
            fail(&cb);
        }
        assert_eq!(cb.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.admits_traffic());

        let permit = cb.try_acquire().unwrap();
        assert!(permit.is_trial());
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        // Only one trial in flight.
        assert!(cb.try_acquire().is_err());
        assert!(!cb.admits_traffic());

        permit.success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.snapshot().window_len, 0);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn test_half_open_needs_success_threshold() {
        let cb = CircuitBreaker::new(1, config(20, 2));
        for _ in 0..5 {
            fail(&cb);
        }
        std::thread::sleep(Duration::from_millis(30));

        succeed(&cb);
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        succeed(&cb);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_trial_failure_reopens() {
        let cb = CircuitBreaker::new(1, config(20, 1));
        for _ in 0..5 {
            fail(&cb);
        }
        std::thread::sleep(Duration::from_millis(30));

        fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
        // Reset timer restarted.
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn test_abandoned_trial_counts_as_failure() {
        let cb = CircuitBreaker::new(1, config(20, 1));
        for _ in 0..5 {
            fail(&cb);
        }
        std::thread::sleep(Duration::from_millis(30));

        let permit = cb.try_acquire().unwrap();
        drop(permit);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.snapshot().trial_in_flight);
    }

    #[tokio::test]
    async fn test_call_ignores_caller_errors() {
        let cb = CircuitBreaker::new(1, config(60_000, 1));
        for _ in 0..10 {
            let res: OrchestratorResult<()> = cb
                .call(async { Err(OrchestratorError::InvalidRequest("bad".into())) })
                .await;
            assert!(res.is_err());
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.snapshot().window_len, 0);

        for _ in 0..5 {
            let _ = cb
                .call(async { Err::<(), _>(OrchestratorError::Timeout(10)) })
                .await;
        }
        assert_eq!(cb.state(), BreakerState::Open);
    }
}
