//! Shared fixtures for integration tests: a scripted in-memory engine and
//! helpers to start an orchestrator around it.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use synth_orchestrator::config::OrchestratorConfig;
use synth_orchestrator::engine::{EngineError, EngineFactory, EngineOutput, SynthesisEngine, SynthesisJob};
use synth_orchestrator::protocol::{MessageBody, OrchestratorEvent, ProtocolMessage};
use synth_orchestrator::Orchestrator;

/// Behaviour shared by every engine a factory creates, keyed by worker id.
#[derive(Debug, Default)]
pub struct Script {
    run_delay_ms: AtomicU64,
    fail_init: AtomicBool,
    failing: Mutex<HashSet<u64>>,
    unresponsive: Mutex<HashSet<u64>>,
    calls: Mutex<Vec<(u64, String)>>,
    created: AtomicU64,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_delay(&self, ms: u64) {
        self.run_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn fail_worker(&self, id: u64) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn heal_worker(&self, id: u64) {
        self.failing.lock().unwrap().remove(&id);
    }

    pub fn make_unresponsive(&self, id: u64) {
        self.unresponsive.lock().unwrap().insert(id);
    }

    pub fn make_responsive(&self, id: u64) {
        self.unresponsive.lock().unwrap().remove(&id);
    }

    /// `(worker id, text)` of every run, in start order.
    pub fn calls(&self) -> Vec<(u64, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_on(&self, id: u64) -> usize {
        self.calls.lock().unwrap().iter().filter(|(w, _)| *w == id).count()
    }

    pub fn engines_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

pub struct ScriptedEngine {
    worker_id: u64,
    script: Arc<Script>,
}

#[async_trait]
impl SynthesisEngine for ScriptedEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        if self.script.fail_init.load(Ordering::SeqCst) {
            return Err(EngineError::Initialization("model files missing".into()));
        }
        Ok(())
    }

    async fn run(&self, job: &SynthesisJob) -> Result<EngineOutput, EngineError> {
        self.script
            .calls
            .lock()
            .unwrap()
            .push((self.worker_id, job.text.clone()));

        let delay = self.script.run_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.script.failing.lock().unwrap().contains(&self.worker_id) {
            return Err(EngineError::Synthesis("vocoder crashed".into()));
        }
        Ok(EngineOutput {
            output_target: Some(
                job.output_target
                    .clone()
                    .unwrap_or_else(|| format!("/tmp/worker-{}.wav", self.worker_id)),
            ),
            duration_ms: Some(job.text.len() as u64 * 10),
        })
    }

    async fn health_ping(&self) -> Result<(), EngineError> {
        if self.script.unresponsive.lock().unwrap().contains(&self.worker_id) {
            return Err(EngineError::Unavailable("no pong".into()));
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

pub struct ScriptedFactory {
    script: Arc<Script>,
    models: Vec<String>,
}

impl ScriptedFactory {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            models: Vec::new(),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, worker_id: u64, _model: Option<&str>) -> Arc<dyn SynthesisEngine> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedEngine {
            worker_id,
            script: self.script.clone(),
        })
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }
}

/// Fast, deterministic settings: one worker, no automatic scaling.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.pool.min_workers = 1;
    config.pool.max_workers = 1;
    config.pool.scaling_interval_ms = 60_000;
    config.pool.drain_grace_ms = 1_000;
    config.pool.restart_backoff_base_ms = 20;
    config.pool.restart_backoff_max_ms = 50;
    config.health_check.interval_ms = 30;
    config.health_check.timeout_ms = 50;
    config.request.timeout_ms = 5_000;
    config.request.retry_base_delay_ms = 1;
    config.engine.init_timeout_ms = 1_000;
    config.api.api_key = "test-key".to_string();
    config.observability.metrics_enabled = false;
    config
}

pub async fn start(config: OrchestratorConfig, script: &Arc<Script>) -> Arc<Orchestrator> {
    start_with(config, ScriptedFactory::new(script.clone())).await
}

pub async fn start_with(config: OrchestratorConfig, factory: ScriptedFactory) -> Arc<Orchestrator> {
    Orchestrator::start(config, Arc::new(factory))
        .await
        .expect("orchestrator failed to start")
}

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive event messages until one satisfies `pred`.
pub async fn wait_for_event<F>(
    rx: &mut tokio::sync::broadcast::Receiver<ProtocolMessage>,
    timeout: Duration,
    mut pred: F,
) -> Option<OrchestratorEvent>
where
    F: FnMut(&OrchestratorEvent) -> bool,
{
    let found = async {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let MessageBody::Event(event) = message.body() {
                        if pred(event) {
                            return Some(event.clone());
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, found).await.ok().flatten()
}
