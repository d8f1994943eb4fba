//! Synthesis workers.
//!
//! # Responsibilities
//! - Wrap one engine instance with a lifecycle state machine
//! - Serve at most one request at a time, through a reservation lease
//! - Route every engine call through the worker's circuit breaker
//! - Report outcomes to metrics and the worker's health record
//! - Announce state and breaker changes on the event channel
//!
//! # Data Flow
//! ```text
//! PoolManager::acquire → Worker::try_reserve (READY → BUSY) → WorkerLease
//!     → WorkerLease::run
//!         → CircuitBreaker::call
//!         → with_deadline (timeout / cancellation)
//!         → SynthesisEngine::run
//!     → drop(lease) → READY, or UNHEALTHY past the failure threshold
//!     → WorkerEvent::StateChanged → manager event loop
//! ```
//!
//! # Design Decisions
//! - Workers never hold a reference back to the pool; they only emit events
//! - The lease releases the worker even if the caller's future is dropped
//! - Forced termination cancels in-flight calls through the worker's token

pub mod metrics;
pub mod state;

use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::engine::{EngineFactory, EngineOutput, SynthesisEngine, SynthesisJob};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::health::HealthRecord;
use crate::load_balancer::WorkerSnapshot;
use crate::observability::metrics as telemetry;
use crate::resilience::{with_deadline, BreakerState, CircuitBreaker};

pub use self::metrics::{MetricsSnapshot, WorkerMetrics};
pub use self::state::{AtomicWorkerState, InvalidTransition, WorkerState};

pub type WorkerId = u64;

/// Notifications emitted by workers.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    StateChanged {
        worker_id: WorkerId,
        from: WorkerState,
        to: WorkerState,
    },
    BreakerChanged {
        worker_id: WorkerId,
        from: BreakerState,
        to: BreakerState,
    },
}

/// Status view of a worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub state: WorkerState,
    pub model: Option<String>,
    pub breaker: BreakerState,
    /// Failures currently in the breaker's sliding window.
    pub breaker_failures: usize,
    pub breaker_window: usize,
    pub health_score: f64,
    pub consecutive_failures: u32,
    pub queue_depth: usize,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub successes: u64,
    pub failures: u64,
    pub restart_failures: u32,
    pub idle_ms: u64,
}

/// A single synthesis worker.
pub struct Worker {
    id: WorkerId,
    model: Option<String>,
    state: AtomicWorkerState,
    engine: RwLock<Arc<dyn SynthesisEngine>>,
    engine_ready: AtomicBool,
    breaker: CircuitBreaker,
    health: Arc<HealthRecord>,
    metrics: WorkerMetrics,
    in_flight: AtomicUsize,
    drained: Notify,
    idle_since: Mutex<Instant>,
    restart_failures: AtomicU32,
    unhealthy_threshold: u32,
    init_timeout: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl Worker {
    /// Create a worker in INITIALIZING. The engine is not started yet.
    pub fn new(
        id: WorkerId,
        model: Option<String>,
        engine: Arc<dyn SynthesisEngine>,
        health: Arc<HealthRecord>,
        config: &OrchestratorConfig,
        parent: &CancellationToken,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        telemetry::record_worker_state(id, WorkerState::Initializing);
        Self {
            id,
            model,
            state: AtomicWorkerState::new(WorkerState::Initializing),
            engine: RwLock::new(engine),
            engine_ready: AtomicBool::new(false),
            breaker: CircuitBreaker::new(id, config.circuit_breaker.clone()),
            health,
            metrics: WorkerMetrics::new(config.health_check.response_window),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            idle_since: Mutex::new(Instant::now()),
            restart_failures: AtomicU32::new(0),
            unhealthy_threshold: config.health_check.unhealthy_threshold,
            init_timeout: Duration::from_millis(config.engine.init_timeout_ms),
            cancel: parent.child_token(),
            events,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> &Arc<HealthRecord> {
        &self.health
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Requests reserved or running on this worker.
    pub fn queue_depth(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the engine finished initializing since the last (re)start.
    pub fn engine_ready(&self) -> bool {
        self.engine_ready.load(Ordering::Acquire)
    }

    pub fn restart_failures(&self) -> u32 {
        self.restart_failures.load(Ordering::Relaxed)
    }

    pub fn record_restart_failure(&self) {
        self.restart_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn engine(&self) -> Arc<dyn SynthesisEngine> {
        self.engine.read().expect("worker engine lock poisoned").clone()
    }

    /// Validated state change from exactly `from` to `to`.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), InvalidTransition> {
        self.state.transition(from, to)?;
        self.on_transition(from, to);
        Ok(())
    }

    /// Validated state change from the current state to `to`.
    pub fn transition_any(&self, to: WorkerState) -> Result<WorkerState, InvalidTransition> {
        let from = self.state.transition_any(to)?;
        self.on_transition(from, to);
        Ok(from)
    }

    fn on_transition(&self, from: WorkerState, to: WorkerState) {
        if to == WorkerState::Ready {
            *self.idle_since.lock().expect("idle mutex poisoned") = Instant::now();
            if from == WorkerState::Initializing {
                self.restart_failures.store(0, Ordering::Relaxed);
            }
        }
        match to {
            WorkerState::Unhealthy => tracing::warn!(
                worker_id = self.id,
                from = from.as_str(),
                consecutive_failures = self.health.consecutive_failures(),
                "Worker marked unhealthy"
            ),
            WorkerState::Busy | WorkerState::Ready if from != WorkerState::Initializing => tracing::trace!(
                worker_id = self.id,
                from = from.as_str(),
                to = to.as_str(),
                "Worker state changed"
            ),
            _ => tracing::info!(
                worker_id = self.id,
                from = from.as_str(),
                to = to.as_str(),
                "Worker state changed"
            ),
        }
        telemetry::record_worker_state(self.id, to);
        let _ = self.events.send(WorkerEvent::StateChanged {
            worker_id: self.id,
            from,
            to,
        });
    }

    /// READY and the breaker would let a call through.
    pub fn is_eligible(&self) -> bool {
        self.state() == WorkerState::Ready && self.breaker.admits_traffic()
    }

    /// How long the worker has been idle in READY.
    pub fn idle_for(&self) -> Duration {
        if self.state() != WorkerState::Ready {
            return Duration::ZERO;
        }
        self.idle_since.lock().expect("idle mutex poisoned").elapsed()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            queue_depth: self.queue_depth(),
            avg_latency_ms: self.metrics.avg_latency_ms(),
            success_rate: self.metrics.success_rate(),
            model: self.model.clone(),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        let health = self.health.snapshot();
        let metrics = self.metrics.snapshot();
        let breaker = self.breaker.snapshot();
        WorkerStatus {
            id: self.id,
            state: self.state(),
            model: self.model.clone(),
            breaker: breaker.state,
            breaker_failures: breaker.failure_count,
            breaker_window: breaker.window_len,
            health_score: health.score,
            consecutive_failures: health.consecutive_failures,
            queue_depth: self.queue_depth(),
            avg_latency_ms: metrics.avg_latency_ms,
            success_rate: metrics.success_rate,
            successes: metrics.successes,
            failures: metrics.failures,
            restart_failures: self.restart_failures(),
            idle_ms: self.idle_for().as_millis() as u64,
        }
    }

    /// Reserve the worker for one request (READY → BUSY).
    pub fn try_reserve(self: &Arc<Self>) -> Option<WorkerLease> {
        if !self.breaker.admits_traffic() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.transition(WorkerState::Ready, WorkerState::Busy).is_err() {
            self.release_slot();
            return None;
        }
        Some(WorkerLease {
            worker: self.clone(),
        })
    }

    fn release_slot(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.drained.notify_waiters();
    }

    /// End of a reservation: back to READY, or UNHEALTHY past the threshold.
    fn finish(&self) {
        self.release_slot();
        let next = if self.health.consecutive_failures() >= self.unhealthy_threshold {
            WorkerState::Unhealthy
        } else {
            WorkerState::Ready
        };
        // Fails harmlessly when the worker was moved to SHUTTING_DOWN meanwhile.
        let _ = self.transition(WorkerState::Busy, next);
    }

    async fn execute(&self, job: &SynthesisJob, timeout: Duration) -> OrchestratorResult<EngineOutput> {
        let engine = self.engine();
        let token = self.cancel.child_token();
        let breaker_before = self.breaker.state();
        let start = Instant::now();

        let result = self
            .breaker
            .call(with_deadline(timeout, &token, async {
                engine.run(job).await.map_err(OrchestratorError::from)
            }))
            .await;

        let latency = start.elapsed();
        match &result {
            Ok(_) => {
                self.metrics.record_success(latency);
                self.health.record_outcome(true, latency);
            }
            Err(e) if e.is_worker_fault() => {
                tracing::warn!(
                    worker_id = self.id,
                    error = %e,
                    latency_ms = latency.as_millis() as u64,
                    "Synthesis failed on worker"
                );
                self.metrics.record_failure(latency);
                self.health.record_outcome(false, latency);
            }
            Err(e) => {
                tracing::debug!(worker_id = self.id, error = %e, "Call rejected");
            }
        }

        let breaker_after = self.breaker.state();
        if breaker_before != breaker_after {
            let _ = self.events.send(WorkerEvent::BreakerChanged {
                worker_id: self.id,
                from: breaker_before,
                to: breaker_after,
            });
        }
        result
    }

    /// Start the engine. The worker stays INITIALIZING until a probe succeeds.
    pub async fn initialize(&self) -> OrchestratorResult<()> {
        let engine = self.engine();
        let result = match tokio::time::timeout(self.init_timeout, engine.initialize()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(OrchestratorError::InitializationFailed(e.to_string())),
            Err(_) => Err(OrchestratorError::InitializationFailed(format!(
                "engine did not initialize within {} ms",
                self.init_timeout.as_millis()
            ))),
        };
        match &result {
            Ok(()) => {
                self.engine_ready.store(true, Ordering::Release);
                tracing::info!(worker_id = self.id, model = ?self.model, "Engine initialized");
            }
            Err(e) => {
                self.restart_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker_id = self.id, error = %e, "Engine initialization failed");
            }
        }
        result
    }

    /// Probe the engine and record the result. Returns whether it answered.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let engine = self.engine();
        let start = Instant::now();
        let ok = match tokio::time::timeout(timeout, engine.health_ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(worker_id = self.id, error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(worker_id = self.id, "Health probe timed out");
                false
            }
        };
        self.health.record_probe(ok, start.elapsed());
        telemetry::record_health_score(self.id, self.health.score());
        ok
    }

    /// Replace the engine with a fresh one and initialize it.
    ///
    /// The worker must already be INITIALIZING (moved there from UNHEALTHY).
    pub async fn restart(&self, factory: &dyn EngineFactory) -> OrchestratorResult<()> {
        if self.state() != WorkerState::Initializing {
            return Err(OrchestratorError::InitializationFailed(format!(
                "worker {} is {}, not initializing",
                self.id,
                self.state().as_str()
            )));
        }
        self.engine_ready.store(false, Ordering::Release);
        let fresh = factory.create(self.id, self.model.as_deref());
        let old = std::mem::replace(
            &mut *self.engine.write().expect("worker engine lock poisoned"),
            fresh,
        );
        old.shutdown().await;
        self.initialize().await
    }

    /// Drain and stop the worker.
    ///
    /// Waits up to `grace` for in-flight work, then cancels it and shuts the
    /// engine down.
    pub async fn terminate(&self, grace: Duration) {
        if self.state() == WorkerState::Terminated {
            return;
        }
        let _ = self.transition_any(WorkerState::ShuttingDown);

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let drained = self.drained.notified();
            if self.queue_depth() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                tracing::warn!(
                    worker_id = self.id,
                    in_flight = self.queue_depth(),
                    "Drain grace elapsed, cancelling in-flight work"
                );
                break;
            }
        }

        self.cancel.cancel();
        self.engine().shutdown().await;
        let _ = self.transition(WorkerState::ShuttingDown, WorkerState::Terminated);
    }
}

/// Exclusive use of a worker for one request.
///
/// Dropping the lease returns the worker to READY (or UNHEALTHY).
#[derive(Debug)]
pub struct WorkerLease {
    worker: Arc<Worker>,
}

impl WorkerLease {
    pub async fn run(&self, job: &SynthesisJob, timeout: Duration) -> OrchestratorResult<EngineOutput> {
        self.worker.execute(job, timeout).await
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }
}

impl Deref for WorkerLease {
    type Target = Worker;
    fn deref(&self) -> &Self::Target {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.worker.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FlakyEngine {
        failing: AtomicBool,
    }

    #[async_trait]
    impl SynthesisEngine for FlakyEngine {
        async fn initialize(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn run(&self, job: &SynthesisJob) -> Result<EngineOutput, EngineError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(EngineError::Synthesis("boom".into()));
            }
            if job.text == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(EngineOutput {
                output_target: Some("/tmp/x.wav".into()),
                duration_ms: Some(10),
            })
        }

        async fn health_ping(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn job(text: &str) -> SynthesisJob {
        SynthesisJob {
            text: text.into(),
            voice: None,
            speed: None,
            pitch: None,
            output_format: None,
            output_target: None,
        }
    }

    fn worker(engine: Arc<FlakyEngine>) -> (Arc<Worker>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let config = OrchestratorConfig::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthRecord::new(1, 10, Duration::from_secs(5)));
        let w = Worker::new(1, None, engine, health, &config, &CancellationToken::new(), tx);
        (Arc::new(w), rx)
    }

    #[tokio::test]
    async fn test_reservation_lifecycle() {
        let (w, mut rx) = worker(Arc::new(FlakyEngine::default()));
        assert!(w.try_reserve().is_none());

        w.initialize().await.unwrap();
        assert!(w.probe(Duration::from_millis(100)).await);
        w.transition(WorkerState::Initializing, WorkerState::Ready).unwrap();

        let lease = w.try_reserve().unwrap();
        assert_eq!(w.state(), WorkerState::Busy);
        assert_eq!(w.queue_depth(), 1);
        // One request at a time.
        assert!(w.try_reserve().is_none());

        let out = lease.run(&job("hi"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(out.duration_ms, Some(10));
        drop(lease);

        assert_eq!(w.state(), WorkerState::Ready);
        assert_eq!(w.queue_depth(), 0);
        assert_eq!(w.metrics().snapshot().successes, 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            WorkerEvent::StateChanged {
                worker_id: 1,
                from: WorkerState::Initializing,
                to: WorkerState::Ready
            }
        );
    }

    #[tokio::test]
    async fn test_failures_mark_unhealthy() {
        let engine = Arc::new(FlakyEngine::default());
        engine.failing.store(true, Ordering::Relaxed);
        let (w, _rx) = worker(engine);
        w.initialize().await.unwrap();
        w.transition(WorkerState::Initializing, WorkerState::Ready).unwrap();

        // Default unhealthy threshold is 3 consecutive failures.
        for _ in 0..3 {
            let lease = w.try_reserve().unwrap();
            let err = lease.run(&job("hi"), Duration::from_secs(1)).await.unwrap_err();
            assert_eq!(err.code(), "SYNTHESIS_FAILED");
        }
        assert_eq!(w.state(), WorkerState::Unhealthy);
        assert!(!w.is_eligible());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let (w, _rx) = worker(Arc::new(FlakyEngine::default()));
        w.initialize().await.unwrap();
        w.transition(WorkerState::Initializing, WorkerState::Ready).unwrap();

        let lease = w.try_reserve().unwrap();
        let err = lease.run(&job("slow"), Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, OrchestratorError::Timeout(20));
        drop(lease);
        assert_eq!(w.health().consecutive_failures(), 1);
        assert_eq!(w.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_terminate_cancels_after_grace() {
        let (w, _rx) = worker(Arc::new(FlakyEngine::default()));
        w.initialize().await.unwrap();
        w.transition(WorkerState::Initializing, WorkerState::Ready).unwrap();

        let lease = w.try_reserve().unwrap();
        let running = tokio::spawn(async move { lease.run(&job("slow"), Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        w.terminate(Duration::from_millis(20)).await;
        let res = running.await.unwrap();
        assert_eq!(res.unwrap_err(), OrchestratorError::ShuttingDown);
        assert_eq!(w.state(), WorkerState::Terminated);
    }
}
