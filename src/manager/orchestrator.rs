//! The orchestrator façade.
//!
//! # Responsibilities
//! - Admit, validate and execute synthesis requests
//! - Retry transient failures once on a different worker
//! - Serve protocol envelopes in the caller's version
//! - Run the background loops (health, worker events, scaling)
//! - Report status and shut everything down in order
//!
//! # Data Flow
//! ```text
//! synthesize(request)
//!     → admission (shutting down?) → validation → model check
//!     → exhausted check → cache lookup
//!     → PoolManager::acquire (lease now, or wait in the queue)
//!     → WorkerLease::run (breaker + deadline)
//!     → retry once elsewhere on a retryable error
//!     → SynthesisResult
//!
//! Worker events ──→ event loop ──→ dispatch queued requests
//!                               ──→ restart UNHEALTHY workers
//!                               ──→ broadcast event messages
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::config::{validate_config, OrchestratorConfig};
use crate::engine::{EngineFactory, SynthesisJob};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::health::{HealthMonitor, WorkerDirectory};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{RequestProfile, ScoringBalancer};
use crate::manager::status::{OrchestratorStatus, PoolStatus, RequestCounters};
use crate::observability::metrics;
use crate::pool::{Acquisition, PoolManager, ScalingDecision};
use crate::protocol::{
    MessageBody, MessageMetadata, OrchestratorEvent, ProtocolMessage, ProtocolNegotiator, Version,
    CURRENT_VERSION,
};
use crate::request::{RequestValidator, ResultMetadata, SynthesisRequest, SynthesisResult};
use crate::resilience::RetryPolicy;
use crate::worker::{WorkerEvent, WorkerLease, WorkerState};

/// How often queued requests are re-matched even without worker events, so
/// breakers whose reset timeout elapsed get their trial call.
const DISPATCH_TICK: Duration = Duration::from_millis(250);

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Orchestrator {
    config: OrchestratorConfig,
    factory: Arc<dyn EngineFactory>,
    pool: Arc<PoolManager>,
    monitor: Arc<HealthMonitor>,
    negotiator: ProtocolNegotiator,
    validator: RequestValidator,
    retry: RetryPolicy,
    cache: ResultCache,
    counters: RequestCounters,
    accepting: AtomicBool,
    in_flight: AtomicU64,
    drained: Notify,
    shutdown: Shutdown,
    root: CancellationToken,
    events: broadcast::Sender<ProtocolMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl Orchestrator {
    /// Build the pool, start `min_workers` workers and the background loops.
    pub async fn start(
        config: OrchestratorConfig,
        factory: Arc<dyn EngineFactory>,
    ) -> OrchestratorResult<Arc<Self>> {
        validate_config(&config).map_err(|errors| {
            OrchestratorError::InitializationFailed(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;

        let root = CancellationToken::new();
        let directory = Arc::new(WorkerDirectory::from_pointee(Vec::new()));
        let monitor = Arc::new(HealthMonitor::new(config.health_check.clone(), directory.clone()));
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pool = Arc::new(PoolManager::new(
            config.clone(),
            factory.clone(),
            Box::new(ScoringBalancer::new()),
            monitor.clone(),
            directory,
            worker_tx,
            root.clone(),
        ));

        let orchestrator = Arc::new(Self {
            validator: RequestValidator::new(&config.request),
            retry: RetryPolicy::new(&config.request),
            cache: ResultCache::new(&config.cache),
            counters: RequestCounters::default(),
            accepting: AtomicBool::new(true),
            in_flight: AtomicU64::new(0),
            drained: Notify::new(),
            shutdown: Shutdown::new(),
            negotiator: ProtocolNegotiator::new(),
            tasks: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            config,
            factory,
            pool,
            monitor,
            root,
            events,
        });

        // Subscribe before workers start so no early event is missed.
        let event_loop = tokio::spawn(run_event_loop(
            orchestrator.pool.clone(),
            worker_rx,
            orchestrator.events.clone(),
            orchestrator.shutdown.subscribe(),
        ));

        orchestrator.pool.start().await;

        let health_loop = tokio::spawn(orchestrator.monitor.clone().run(orchestrator.shutdown.subscribe()));
        let scaling_loop = tokio::spawn(run_scaling_loop(
            orchestrator.pool.clone(),
            Duration::from_millis(orchestrator.config.pool.scaling_interval_ms),
            orchestrator.events.clone(),
            orchestrator.shutdown.subscribe(),
        ));
        orchestrator
            .tasks
            .lock()
            .expect("task list mutex poisoned")
            .extend([event_loop, health_loop, scaling_loop]);

        tracing::info!(
            workers = orchestrator.pool.pool_size(),
            protocol = %CURRENT_VERSION,
            "Orchestrator started"
        );
        Ok(orchestrator)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Subscribe to worker, breaker and scaling events.
    pub fn events(&self) -> broadcast::Receiver<ProtocolMessage> {
        self.events.subscribe()
    }

    pub fn negotiate(&self, requirement: &str) -> OrchestratorResult<Version> {
        self.negotiator.negotiate(requirement)
    }

    fn admit(&self) -> Option<AdmissionGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = AdmissionGuard { orchestrator: self };
        self.is_accepting().then_some(guard)
    }

    /// Run one synthesis request to completion. Failures are reported in the
    /// result, never as a panic or a dropped request.
    pub async fn synthesize(&self, request: SynthesisRequest) -> SynthesisResult {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let outcome = match self.admit() {
            Some(_guard) => self.process(&request_id, request, start).await,
            None => Err(OrchestratorError::ShuttingDown),
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(mut result) => {
                result.latency_ms = latency_ms;
                metrics::record_request("success", start);
                result
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    code = e.code(),
                    error = %e,
                    latency_ms,
                    "Synthesis request failed"
                );
                metrics::record_request(e.code(), start);
                SynthesisResult::failure(request_id, &e, latency_ms)
            }
        };
        self.counters.record(result.success, result.metadata.cache_hit);
        result
    }

    async fn process(
        &self,
        request_id: &str,
        request: SynthesisRequest,
        start: Instant,
    ) -> OrchestratorResult<SynthesisResult> {
        let request = self.validator.validate(&request)?;
        if let Some(voice) = &request.voice {
            let models = self.factory.models();
            if !models.is_empty() && !models.iter().any(|m| m == voice) {
                return Err(OrchestratorError::ModelNotFound(voice.clone()));
            }
        }
        if self.pool.is_exhausted() {
            return Err(OrchestratorError::ResourceExhausted(
                "no worker is ready and every restart keeps failing".into(),
            ));
        }

        let cache_key = self.cache.key(&request);
        if let Some(mut hit) = cache_key.as_ref().and_then(|key| self.cache.get(key)) {
            tracing::debug!(request_id, "Serving synthesis result from cache");
            hit.request_id = request_id.to_string();
            hit.metadata.cache_hit = true;
            return Ok(hit);
        }

        self.pool.record_demand(request.voice.as_deref());
        let profile = RequestProfile {
            model: request.voice.clone(),
            priority: request.priority,
        };
        let job = job_for(&request);
        let timeout_ms = self.config.request.timeout_ms;
        let deadline = start + Duration::from_millis(timeout_ms);

        let mut lease = self.acquire(&profile, deadline, timeout_ms).await?;
        let mut attempt = 1;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OrchestratorError::Timeout(timeout_ms));
            }
            let worker_id = lease.id();
            // The worker only saw what was left of the budget; report the whole of it.
            let outcome = lease.run(&job, remaining).await.map_err(|e| match e {
                OrchestratorError::Timeout(_) => OrchestratorError::Timeout(timeout_ms),
                other => other,
            });
            match outcome {
                Ok(output) => {
                    let result = SynthesisResult {
                        success: true,
                        request_id: request_id.to_string(),
                        output_target: output.output_target,
                        duration_ms: output.duration_ms,
                        latency_ms: 0,
                        error: None,
                        metadata: ResultMetadata {
                            model_used: lease.model().map(str::to_string).or_else(|| request.voice.clone()),
                            worker_used: Some(worker_id),
                            cache_hit: false,
                        },
                    };
                    drop(lease);
                    if let Some(key) = cache_key {
                        self.cache.insert(key, result.clone());
                    }
                    tracing::debug!(request_id, worker_id, attempt, "Synthesis succeeded");
                    return Ok(result);
                }
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    drop(lease);
                    let delay = self
                        .retry
                        .delay(attempt)
                        .min(deadline.saturating_duration_since(Instant::now()));
                    time::sleep(delay).await;
                    match self.pool.try_acquire_excluding(&profile, worker_id) {
                        Some(next) => {
                            tracing::info!(
                                request_id,
                                failed_worker = worker_id,
                                retry_worker = next.id(),
                                error = %e,
                                "Retrying on another worker"
                            );
                            self.counters.record_retry();
                            lease = next;
                            attempt += 1;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Lease a worker, waiting in the queue until `deadline` if none is free.
    async fn acquire(
        &self,
        profile: &RequestProfile,
        deadline: Instant,
        timeout_ms: u64,
    ) -> OrchestratorResult<WorkerLease> {
        let (ticket, mut rx) = match self.pool.acquire(profile.clone())? {
            Acquisition::Leased(lease) => return Ok(lease),
            Acquisition::Queued { ticket, rx } => (ticket, rx),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            res = &mut rx => res.map_err(|_| OrchestratorError::ShuttingDown),
            _ = time::sleep(remaining) => {
                // If a lease raced in, dropping `rx` releases it again.
                self.pool.withdraw(ticket);
                Err(OrchestratorError::Timeout(timeout_ms))
            }
            _ = self.root.cancelled() => {
                self.pool.withdraw(ticket);
                Err(OrchestratorError::ShuttingDown)
            }
        }
    }

    /// Answer a protocol message in the caller's version.
    pub async fn handle_message(&self, message: ProtocolMessage) -> ProtocolMessage {
        let caller_version = message.version().clone();
        let reply = match self.negotiator.adapt(&message, CURRENT_VERSION) {
            Ok(current) => self.dispatch_message(current).await,
            Err(e) => ProtocolMessage::error(&e),
        };
        match self.negotiator.adapt(&reply, caller_version) {
            Ok(adapted) => adapted,
            Err(_) => reply,
        }
    }

    async fn dispatch_message(&self, message: ProtocolMessage) -> ProtocolMessage {
        let incoming_id = message.message_id().to_string();
        let envelope_priority = message.metadata().and_then(|m| m.priority);
        match message.into_body() {
            MessageBody::Request(mut request) => {
                if let Some(priority) = envelope_priority {
                    request.priority = priority;
                }
                let result = self.synthesize(request).await;
                let correlation_id = Some(result.request_id.clone());
                ProtocolMessage::response(result).with_metadata(MessageMetadata {
                    correlation_id,
                    ..Default::default()
                })
            }
            other => {
                let err = OrchestratorError::InvalidRequest(format!(
                    "cannot handle a {} message",
                    other.kind()
                ));
                ProtocolMessage::error(&err).with_metadata(MessageMetadata {
                    correlation_id: Some(incoming_id),
                    ..Default::default()
                })
            }
        }
    }

    pub fn get_status(&self) -> OrchestratorStatus {
        let pool = &self.pool;
        OrchestratorStatus {
            protocol_version: CURRENT_VERSION.to_string(),
            supported_versions: self.negotiator.supported().iter().map(|v| v.to_string()).collect(),
            accepting: self.is_accepting(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            pool: PoolStatus {
                size: pool.pool_size(),
                min_workers: self.config.pool.min_workers,
                max_workers: self.config.pool.max_workers,
                queue_depth: pool.queue_depth(),
                oldest_wait_ms: pool.oldest_wait_ms(),
                scaling_paused: pool.scaling_paused(),
                last_decision: pool.last_decision(),
                exhausted: pool.is_exhausted(),
                demand: pool.demand(),
            },
            workers: pool.statuses(),
            requests: self.counters.snapshot(self.in_flight.load(Ordering::Acquire)),
            cache: self.cache.stats(),
        }
    }

    /// Stop admission, drain in-flight requests, stop the loops and terminate
    /// every worker. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        let grace = Duration::from_millis(self.config.pool.drain_grace_ms);
        let deadline = time::Instant::now() + grace;
        tracing::info!(
            in_flight = self.in_flight.load(Ordering::Acquire),
            grace_ms = grace.as_millis() as u64,
            "Orchestrator shutting down, draining requests"
        );

        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            if time::timeout_at(deadline, drained).await.is_err() {
                tracing::warn!(
                    in_flight = self.in_flight.load(Ordering::Acquire),
                    "Drain grace elapsed, cancelling remaining requests"
                );
                break;
            }
        }

        self.shutdown.trigger();
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        self.pool.shutdown(remaining).await;
        self.root.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().expect("task list mutex poisoned"));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }
        tracing::info!("Orchestrator stopped");
    }
}

/// Counts a request as in flight for the shutdown drain.
struct AdmissionGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.orchestrator.drained.notify_waiters();
    }
}

fn job_for(request: &SynthesisRequest) -> SynthesisJob {
    SynthesisJob {
        text: request.text.clone(),
        voice: request.voice.clone(),
        speed: request.speed,
        pitch: request.pitch,
        output_format: request.output_format.clone(),
        output_target: request.output_target.clone(),
    }
}

/// React to worker events until shutdown.
async fn run_event_loop(
    pool: Arc<PoolManager>,
    mut worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    events: broadcast::Sender<ProtocolMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = time::interval(DISPATCH_TICK);
    tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = worker_events.recv() => {
                let Some(event) = event else { break };
                let message = match event {
                    WorkerEvent::StateChanged { worker_id, from, to } => {
                        match to {
                            WorkerState::Ready => pool.dispatch(),
                            WorkerState::Unhealthy => pool.handle_unhealthy(worker_id),
                            _ => {}
                        }
                        OrchestratorEvent::WorkerState { worker_id, from, to }
                    }
                    WorkerEvent::BreakerChanged { worker_id, from, to } => {
                        pool.dispatch();
                        OrchestratorEvent::Breaker { worker_id, from, to }
                    }
                };
                // No subscribers is fine.
                let _ = events.send(ProtocolMessage::event(message));
            }
            _ = tick.tick() => pool.dispatch(),
            _ = shutdown.recv() => {
                tracing::debug!("Event loop received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

/// Evaluate scaling every `interval` until shutdown.
async fn run_scaling_loop(
    pool: Arc<PoolManager>,
    interval: Duration,
    events: broadcast::Sender<ProtocolMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick fires immediately; startup already sized the pool.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let decision = pool.evaluate_scaling().await;
                if !matches!(decision, ScalingDecision::NoChange { .. }) {
                    let _ = events.send(ProtocolMessage::event(OrchestratorEvent::Scaling {
                        decision,
                        pool_size: pool.pool_size(),
                    }));
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Scaling loop received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
