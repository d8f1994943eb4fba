//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every worker, each in its own task
//! - Promote INITIALIZING workers once their engine answers
//! - Mark READY workers UNHEALTHY past the failure threshold
//! - Own the per-worker health records

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::HealthRecord;
use crate::worker::{Worker, WorkerId, WorkerState};

/// Published list of live workers, swapped by the pool on every change.
pub type WorkerDirectory = ArcSwap<Vec<Arc<Worker>>>;

pub struct HealthMonitor {
    config: HealthCheckConfig,
    workers: Arc<WorkerDirectory>,
    records: DashMap<WorkerId, Arc<HealthRecord>>,
}

impl HealthMonitor {
    pub fn new(config: HealthCheckConfig, workers: Arc<WorkerDirectory>) -> Self {
        Self {
            config,
            workers,
            records: DashMap::new(),
        }
    }

    /// Create the health record for a new worker.
    pub fn register(&self, worker_id: WorkerId) -> Arc<HealthRecord> {
        let record = Arc::new(HealthRecord::new(
            worker_id,
            self.config.response_window,
            Duration::from_millis(self.config.interval_ms),
        ));
        self.records.insert(worker_id, record.clone());
        record
    }

    pub fn unregister(&self, worker_id: WorkerId) {
        self.records.remove(&worker_id);
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every probe-able worker concurrently and apply the results.
    pub async fn check_all(&self) {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let threshold = self.config.unhealthy_threshold;
        let mut probes = JoinSet::new();

        for worker in self.workers.load().iter() {
            if !should_probe(worker) {
                continue;
            }
            let worker = worker.clone();
            probes.spawn(async move {
                let ok = worker.probe(timeout).await;
                apply_probe(&worker, ok, threshold);
            });
        }

        while let Some(res) = probes.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Health probe task failed");
            }
        }
    }
}

/// BUSY workers are covered by request outcomes; restarting workers are
/// probed only once their new engine is up.
fn should_probe(worker: &Worker) -> bool {
    match worker.state() {
        WorkerState::Ready => true,
        WorkerState::Initializing => worker.engine_ready(),
        _ => false,
    }
}

/// Act on a probe result.
pub fn apply_probe(worker: &Worker, ok: bool, unhealthy_threshold: u32) {
    match worker.state() {
        WorkerState::Initializing if ok && worker.engine_ready() => {
            let _ = worker.transition(WorkerState::Initializing, WorkerState::Ready);
        }
        WorkerState::Ready if !ok && worker.health().consecutive_failures() >= unhealthy_threshold => {
            let _ = worker.transition(WorkerState::Ready, WorkerState::Unhealthy);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::engine::{EngineError, EngineOutput, SynthesisEngine, SynthesisJob};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct PingEngine {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl SynthesisEngine for PingEngine {
        async fn initialize(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn run(&self, _job: &SynthesisJob) -> Result<EngineOutput, EngineError> {
            Err(EngineError::Synthesis("not used".into()))
        }

        async fn health_ping(&self) -> Result<(), EngineError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(EngineError::Unavailable("down".into()))
            }
        }

        async fn shutdown(&self) {}
    }

    fn setup() -> (Arc<HealthMonitor>, Arc<Worker>, Arc<PingEngine>) {
        let config = OrchestratorConfig::default();
        let directory = Arc::new(WorkerDirectory::from_pointee(Vec::new()));
        let monitor = Arc::new(HealthMonitor::new(config.health_check.clone(), directory.clone()));
        let engine = Arc::new(PingEngine {
            healthy: AtomicBool::new(true),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = Arc::new(Worker::new(
            7,
            None,
            engine.clone(),
            monitor.register(7),
            &config,
            &CancellationToken::new(),
            tx,
        ));
        directory.store(Arc::new(vec![worker.clone()]));
        (monitor, worker, engine)
    }

    #[tokio::test]
    async fn test_initializing_worker_promoted_after_health_check() {
        let (monitor, worker, _engine) = setup();

        // Engine not started yet: not probed, stays INITIALIZING.
        monitor.check_all().await;
        assert_eq!(worker.state(), WorkerState::Initializing);

        worker.initialize().await.unwrap();
        monitor.check_all().await;
        assert_eq!(worker.state(), WorkerState::Ready);
        assert_eq!(worker.health().score(), 100.0);
    }

    #[tokio::test]
    async fn test_failing_health_checks_mark_unhealthy() {
        let (monitor, worker, engine) = setup();
        worker.initialize().await.unwrap();
        monitor.check_all().await;
        assert_eq!(worker.state(), WorkerState::Ready);

        engine.healthy.store(false, Ordering::Relaxed);
        monitor.check_all().await;
        monitor.check_all().await;
        assert_eq!(worker.state(), WorkerState::Ready);
        monitor.check_all().await;
        assert_eq!(worker.state(), WorkerState::Unhealthy);
        assert_eq!(worker.health().consecutive_failures(), 3);

        // Unhealthy workers await restart and are not probed further.
        monitor.check_all().await;
        assert_eq!(worker.health().consecutive_failures(), 3);
    }

    #[test]
    fn test_register_and_unregister() {
        let directory = Arc::new(WorkerDirectory::from_pointee(Vec::new()));
        let monitor = HealthMonitor::new(HealthCheckConfig::default(), directory);
        let record = monitor.register(3);
        assert_eq!(record.worker_id(), 3);
        assert!(monitor.records.contains_key(&3));
        monitor.unregister(3);
        assert!(monitor.records.is_empty());
    }
}
