//! Worker pool management.
//!
//! # Responsibilities
//! - Own the worker registry and the pending-request queue
//! - Select and reserve workers for requests, or queue them
//! - Hand freed workers to the oldest highest-priority waiter
//! - Create, restart and retire workers
//! - Carry out scaling decisions, one at a time
//!
//! # Design Decisions
//! - One mutex guards registry, queue and demand counts; it is never held
//!   across an await
//! - Selection and reservation happen under that mutex, so a worker can never
//!   be handed out twice
//! - A read-only worker list is published through arc-swap for the health
//!   monitor and status queries

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::engine::EngineFactory;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::health::{apply_probe, HealthMonitor, WorkerDirectory};
use crate::load_balancer::{LoadBalancer, PriorityQueue, QueueTicket, RequestProfile, WorkerSnapshot};
use crate::observability::metrics;
use crate::pool::scaler::{Scaler, ScalingDecision, ScalingInputs};
use crate::resilience::{calculate_backoff, BackoffGate};
use crate::worker::{Worker, WorkerEvent, WorkerId, WorkerLease, WorkerState, WorkerStatus};

/// A request waiting for a worker.
#[derive(Debug)]
struct Waiter {
    profile: RequestProfile,
    tx: oneshot::Sender<WorkerLease>,
}

#[derive(Debug)]
struct Registry {
    workers: BTreeMap<WorkerId, Arc<Worker>>,
    queue: PriorityQueue<Waiter>,
    demand: HashMap<String, u64>,
    restarting: HashSet<WorkerId>,
    closed: bool,
}

/// Result of asking the pool for a worker.
#[derive(Debug)]
pub enum Acquisition {
    /// A worker was reserved immediately.
    Leased(WorkerLease),
    /// No worker was eligible; the lease arrives on `rx`.
    Queued {
        ticket: QueueTicket,
        rx: oneshot::Receiver<WorkerLease>,
    },
}

/// Owner of all workers.
pub struct PoolManager {
    config: OrchestratorConfig,
    factory: Arc<dyn EngineFactory>,
    balancer: Box<dyn LoadBalancer>,
    monitor: Arc<HealthMonitor>,
    scaler: Scaler,
    registry: Mutex<Registry>,
    directory: Arc<WorkerDirectory>,
    next_id: AtomicU64,
    scaling: AsyncMutex<()>,
    spawn_backoff: Mutex<BackoffGate>,
    last_decision: Mutex<Option<ScalingDecision>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    root: CancellationToken,
}

impl PoolManager {
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn EngineFactory>,
        balancer: Box<dyn LoadBalancer>,
        monitor: Arc<HealthMonitor>,
        directory: Arc<WorkerDirectory>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        root: CancellationToken,
    ) -> Self {
        let spawn_backoff = BackoffGate::new(
            config.pool.restart_backoff_base_ms,
            config.pool.restart_backoff_max_ms,
        );
        Self {
            scaler: Scaler::new(config.pool.clone()),
            registry: Mutex::new(Registry {
                workers: BTreeMap::new(),
                queue: PriorityQueue::new(config.queue.max_queue_size),
                demand: HashMap::new(),
                restarting: HashSet::new(),
                closed: false,
            }),
            config,
            factory,
            balancer,
            monitor,
            directory,
            next_id: AtomicU64::new(1),
            scaling: AsyncMutex::new(()),
            spawn_backoff: Mutex::new(spawn_backoff),
            last_decision: Mutex::new(None),
            events,
            root,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().expect("pool registry mutex poisoned")
    }

    fn publish(&self, reg: &Registry) {
        self.directory
            .store(Arc::new(reg.workers.values().cloned().collect()));
        metrics::record_pool_size(reg.workers.len());
    }

    /// Create the initial `min_workers` workers concurrently.
    pub async fn start(self: &Arc<Self>) {
        let mut spawns = JoinSet::new();
        for _ in 0..self.config.pool.min_workers {
            let pool = self.clone();
            spawns.spawn(async move { pool.spawn_worker().await });
        }
        while let Some(res) = spawns.join_next().await {
            match res {
                Ok(Ok(id)) => tracing::debug!(worker_id = id, "Initial worker started"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Initial worker failed to start"),
                Err(e) => tracing::error!(error = %e, "Worker spawn task failed"),
            }
        }
        tracing::info!(workers = self.pool_size(), "Worker pool started");
    }

    /// Model tag for a new worker.
    fn choose_model(&self, reg: &Registry) -> Option<String> {
        if !self.config.pool.model_specialization {
            return self.config.pool.default_model.clone();
        }
        reg.demand
            .iter()
            .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then_with(|| tb.cmp(ta)))
            .map(|(tag, _)| tag.clone())
            .or_else(|| self.config.pool.default_model.clone())
    }

    /// Add one worker and bring it up.
    ///
    /// The worker joins the registry immediately (INITIALIZING). If its engine
    /// fails to start it stays registered and is restarted with backoff.
    pub async fn spawn_worker(self: &Arc<Self>) -> OrchestratorResult<WorkerId> {
        let worker = {
            let mut reg = self.lock();
            if reg.closed {
                return Err(OrchestratorError::ShuttingDown);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let model = self.choose_model(&reg);
            let engine = self.factory.create(id, model.as_deref());
            let worker = Arc::new(Worker::new(
                id,
                model,
                engine,
                self.monitor.register(id),
                &self.config,
                &self.root,
                self.events.clone(),
            ));
            reg.workers.insert(id, worker.clone());
            self.publish(&reg);
            worker
        };

        tracing::info!(worker_id = worker.id(), model = ?worker.model(), "Spawning worker");
        let result = match worker.initialize().await {
            Ok(()) => {
                self.promote(&worker).await;
                if worker.state() == WorkerState::Initializing {
                    worker.record_restart_failure();
                    Err(OrchestratorError::InitializationFailed(format!(
                        "worker {} failed its first health probe",
                        worker.id()
                    )))
                } else {
                    Ok(worker.id())
                }
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.schedule_restart(worker);
        }
        result
    }

    /// Probe a freshly initialized worker so it can become READY.
    async fn promote(&self, worker: &Worker) {
        let hc = &self.config.health_check;
        if !hc.enabled {
            let _ = worker.transition(WorkerState::Initializing, WorkerState::Ready);
            return;
        }
        let ok = worker.probe(Duration::from_millis(hc.timeout_ms)).await;
        apply_probe(worker, ok, hc.unhealthy_threshold);
    }

    /// React to a worker becoming UNHEALTHY: restart it.
    pub fn handle_unhealthy(self: &Arc<Self>, worker_id: WorkerId) {
        let Some(worker) = self.worker(worker_id) else {
            return;
        };
        if worker.transition(WorkerState::Unhealthy, WorkerState::Initializing).is_ok() {
            self.schedule_restart(worker);
        }
    }

    /// Restart an INITIALIZING worker in the background, backing off between
    /// failed attempts. At most one restart task per worker.
    fn schedule_restart(self: &Arc<Self>, worker: Arc<Worker>) {
        if !self.lock().restarting.insert(worker.id()) {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            let base = pool.config.pool.restart_backoff_base_ms;
            let max = pool.config.pool.restart_backoff_max_ms;
            loop {
                let delay = calculate_backoff(worker.restart_failures(), base, max);
                if !delay.is_zero() {
                    tracing::info!(
                        worker_id = worker.id(),
                        attempt = worker.restart_failures() + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Restart backoff"
                    );
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = pool.root.cancelled() => break,
                }
                if worker.state() != WorkerState::Initializing {
                    break;
                }
                match worker.restart(pool.factory.as_ref()).await {
                    Ok(()) => {
                        pool.promote(&worker).await;
                        if worker.state() != WorkerState::Initializing {
                            metrics::record_restart("success");
                            break;
                        }
                        worker.record_restart_failure();
                        metrics::record_restart("failure");
                        tracing::warn!(
                            worker_id = worker.id(),
                            failures = worker.restart_failures(),
                            "Restarted worker failed its first health probe"
                        );
                    }
                    Err(e) => {
                        metrics::record_restart("failure");
                        tracing::warn!(
                            worker_id = worker.id(),
                            failures = worker.restart_failures(),
                            error = %e,
                            "Worker restart failed"
                        );
                    }
                }
            }
            pool.lock().restarting.remove(&worker.id());
        });
    }

    /// Count a request for `model` toward specialization demand.
    pub fn record_demand(&self, model: Option<&str>) {
        if let Some(tag) = model {
            *self.lock().demand.entry(tag.to_string()).or_insert(0) += 1;
        }
    }

    fn reserve_best(&self, reg: &Registry, profile: &RequestProfile, exclude: Option<WorkerId>) -> Option<WorkerLease> {
        let mut candidates: Vec<WorkerSnapshot> = reg
            .workers
            .values()
            .filter(|w| Some(w.id()) != exclude && w.is_eligible())
            .map(|w| w.snapshot())
            .collect();

        while let Some(id) = self.balancer.select(&candidates, profile) {
            if let Some(lease) = reg.workers.get(&id).and_then(|w| w.try_reserve()) {
                return Some(lease);
            }
            candidates.retain(|c| c.id != id);
        }
        None
    }

    /// Reserve the best eligible worker, or join the queue.
    pub fn acquire(&self, profile: RequestProfile) -> OrchestratorResult<Acquisition> {
        let mut reg = self.lock();
        if reg.closed {
            return Err(OrchestratorError::ShuttingDown);
        }
        if let Some(lease) = self.reserve_best(&reg, &profile, None) {
            return Ok(Acquisition::Leased(lease));
        }
        let (tx, rx) = oneshot::channel();
        let priority = profile.priority;
        let ticket = reg.queue.push(priority, Waiter { profile, tx })?;
        metrics::record_queue_depth(reg.queue.len());
        tracing::debug!(
            priority = priority.as_str(),
            queue_depth = reg.queue.len(),
            "No eligible worker, request queued"
        );
        Ok(Acquisition::Queued { ticket, rx })
    }

    /// Reserve an eligible worker other than `exclude`, without queueing.
    pub fn try_acquire_excluding(&self, profile: &RequestProfile, exclude: WorkerId) -> Option<WorkerLease> {
        let reg = self.lock();
        if reg.closed {
            return None;
        }
        self.reserve_best(&reg, profile, Some(exclude))
    }

    /// Remove a waiter that gave up. Returns false if it was already served.
    pub fn withdraw(&self, ticket: QueueTicket) -> bool {
        let mut reg = self.lock();
        let removed = reg.queue.remove(ticket).is_some();
        metrics::record_queue_depth(reg.queue.len());
        removed
    }

    /// Match queued requests with eligible workers, oldest highest-priority
    /// first, until either runs out.
    pub fn dispatch(&self) {
        let mut reg = self.lock();
        loop {
            let lease = match reg.queue.peek() {
                Some(waiter) => match self.reserve_best(&reg, &waiter.profile, None) {
                    Some(lease) => lease,
                    None => break,
                },
                None => break,
            };
            let Some(waiter) = reg.queue.pop() else {
                break;
            };
            // A closed receiver means the caller timed out; the returned lease
            // is dropped, which frees the worker for the next waiter.
            if let Err(lease) = waiter.tx.send(lease) {
                tracing::debug!(worker_id = lease.id(), "Queued request gone, releasing worker");
            }
        }
        metrics::record_queue_depth(reg.queue.len());
    }

    fn scaling_inputs(&self) -> ScalingInputs {
        let reg = self.lock();
        let mut latency_sum = 0.0;
        let mut latency_n = 0usize;
        let mut longest_idle = Duration::ZERO;
        let mut active = 0usize;
        for w in reg.workers.values() {
            if !w.state().is_active() {
                continue;
            }
            active += 1;
            let avg = w.metrics().avg_latency_ms();
            if avg > 0.0 {
                latency_sum += avg;
                latency_n += 1;
            }
            longest_idle = longest_idle.max(w.idle_for());
        }
        ScalingInputs {
            queue_depth: reg.queue.len(),
            avg_latency_ms: if latency_n == 0 { 0.0 } else { latency_sum / latency_n as f64 },
            longest_idle,
            active_workers: active,
        }
    }

    /// Run one scaling evaluation and act on it.
    pub async fn evaluate_scaling(self: &Arc<Self>) -> ScalingDecision {
        let _serial = self.scaling.lock().await;
        let inputs = self.scaling_inputs();

        let paused = {
            let gate = self.spawn_backoff.lock().expect("backoff mutex poisoned");
            gate.is_paused()
        };
        let mut decision = self.scaler.evaluate(&inputs);
        if paused && matches!(decision, ScalingDecision::ScaleUp { .. }) {
            tracing::debug!("Scale-up paused by backoff");
            decision = ScalingDecision::NoChange {
                target: inputs.active_workers,
            };
        }

        match decision {
            ScalingDecision::ScaleUp { target } => {
                tracing::info!(
                    target,
                    queue_depth = inputs.queue_depth,
                    avg_latency_ms = inputs.avg_latency_ms,
                    "Scaling up"
                );
                let spawned = self.spawn_worker().await;
                let mut gate = self.spawn_backoff.lock().expect("backoff mutex poisoned");
                match spawned {
                    Ok(_) => gate.record_success(),
                    Err(e) => {
                        let pause = gate.record_failure();
                        tracing::warn!(
                            error = %e,
                            pause_ms = pause.as_millis() as u64,
                            "Scale-up failed, pausing scaling"
                        );
                    }
                }
            }
            ScalingDecision::ScaleDown { target } => {
                tracing::info!(
                    target,
                    idle_ms = inputs.longest_idle.as_millis() as u64,
                    "Scaling down"
                );
                self.scale_down_one().await;
            }
            ScalingDecision::NoChange { .. } => {}
        }
        if !matches!(decision, ScalingDecision::NoChange { .. }) {
            metrics::record_scaling(decision.as_str());
        }
        *self.last_decision.lock().expect("decision mutex poisoned") = Some(decision);

        self.dispatch();
        decision
    }

    /// Retire the longest-idle READY worker.
    async fn scale_down_one(&self) -> Option<WorkerId> {
        let threshold = Duration::from_millis(self.config.pool.scale_down_idle_threshold_ms);
        let victim = {
            let mut reg = self.lock();
            let candidate = reg
                .workers
                .values()
                .filter(|w| w.state() == WorkerState::Ready && w.idle_for() > threshold)
                .max_by_key(|w| w.idle_for())
                .cloned()?;
            // Claim it while holding the lock so it cannot be selected.
            candidate
                .transition(WorkerState::Ready, WorkerState::ShuttingDown)
                .ok()?;
            reg.workers.remove(&candidate.id());
            self.publish(&reg);
            candidate
        };

        victim
            .terminate(Duration::from_millis(self.config.pool.drain_grace_ms))
            .await;
        self.monitor.unregister(victim.id());
        tracing::info!(worker_id = victim.id(), "Worker retired");
        Some(victim.id())
    }

    /// Stop admitting work, fail queued requests and terminate every worker.
    pub async fn shutdown(&self, grace: Duration) {
        let workers: Vec<Arc<Worker>> = {
            let mut reg = self.lock();
            reg.closed = true;
            // Dropping the senders wakes every waiter with an error.
            let abandoned = reg.queue.drain();
            if !abandoned.is_empty() {
                tracing::warn!(count = abandoned.len(), "Dropping queued requests on shutdown");
            }
            metrics::record_queue_depth(0);
            let workers = std::mem::take(&mut reg.workers).into_values().collect();
            self.publish(&reg);
            workers
        };

        let mut stops = JoinSet::new();
        for worker in workers {
            let monitor = self.monitor.clone();
            stops.spawn(async move {
                worker.terminate(grace).await;
                monitor.unregister(worker.id());
            });
        }
        while stops.join_next().await.is_some() {}
        tracing::info!("All workers terminated");
    }

    pub fn worker(&self, id: WorkerId) -> Option<Arc<Worker>> {
        self.lock().workers.get(&id).cloned()
    }

    pub fn pool_size(&self) -> usize {
        self.lock().workers.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    /// Age of the oldest queued request.
    pub fn oldest_wait_ms(&self) -> Option<u64> {
        self.lock().queue.oldest_wait_ms()
    }

    pub fn has_ready_worker(&self) -> bool {
        self.lock()
            .workers
            .values()
            .any(|w| matches!(w.state(), WorkerState::Ready | WorkerState::Busy))
    }

    /// No worker can serve and every worker keeps failing to restart.
    pub fn is_exhausted(&self) -> bool {
        let limit = self.config.pool.exhausted_after_restart_failures;
        let reg = self.lock();
        !reg.workers.is_empty()
            && reg.workers.values().all(|w| {
                !matches!(w.state(), WorkerState::Ready | WorkerState::Busy)
                    && w.restart_failures() >= limit
            })
    }

    /// Whether scale-ups are currently paused after failures.
    pub fn scaling_paused(&self) -> bool {
        self.spawn_backoff
            .lock()
            .expect("backoff mutex poisoned")
            .is_paused()
    }

    pub fn last_decision(&self) -> Option<ScalingDecision> {
        *self.last_decision.lock().expect("decision mutex poisoned")
    }

    pub fn demand(&self) -> HashMap<String, u64> {
        self.lock().demand.clone()
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.directory.load().iter().map(|w| w.status()).collect()
    }
}
