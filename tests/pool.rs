//! Pool growth: model specialization and the scale-up pause after failures.

use synth_orchestrator::pool::ScalingDecision;
use synth_orchestrator::SynthesisRequest;

mod common;
use common::{test_config, Script};

/// Settings where any completed request makes the pool look slow, so each
/// evaluation asks for one more worker until `max_workers`.
fn latency_bound_config(max_workers: usize) -> synth_orchestrator::OrchestratorConfig {
    let mut config = test_config();
    config.pool.max_workers = max_workers;
    config.pool.target_latency_ms = 5;
    config.pool.low_latency_threshold_ms = 1;
    config
}

#[tokio::test]
async fn test_new_workers_take_most_requested_model() {
    let script = Script::new();
    script.set_delay(30);
    let mut config = latency_bound_config(3);
    config.pool.model_specialization = true;
    config.pool.default_model = Some("en".into());
    let orch = common::start(config, &script).await;
    let pool = orch.pool();

    // No demand yet: the configured default.
    assert_eq!(pool.worker(1).unwrap().model(), Some("en"));
    assert!(orch.synthesize(SynthesisRequest::new("warm up")).await.success);

    // Equal demand: the lexicographically smallest tag wins.
    pool.record_demand(Some("fr"));
    pool.record_demand(Some("de"));
    pool.record_demand(None);
    let decision = pool.evaluate_scaling().await;
    assert!(matches!(decision, ScalingDecision::ScaleUp { target: 2 }));
    assert_eq!(pool.worker(2).unwrap().model(), Some("de"));

    pool.record_demand(Some("fr"));
    let decision = pool.evaluate_scaling().await;
    assert!(matches!(decision, ScalingDecision::ScaleUp { target: 3 }));
    assert_eq!(pool.worker(3).unwrap().model(), Some("fr"));
    assert_eq!(pool.demand().get("fr"), Some(&2));

    orch.shutdown().await;
}

#[tokio::test]
async fn test_specialization_off_uses_default_model() {
    let script = Script::new();
    script.set_delay(30);
    let mut config = latency_bound_config(2);
    config.pool.default_model = Some("en".into());
    let orch = common::start(config, &script).await;
    let pool = orch.pool();

    assert!(orch.synthesize(SynthesisRequest::new("warm up")).await.success);
    pool.record_demand(Some("fr"));
    pool.record_demand(Some("fr"));

    assert!(matches!(
        pool.evaluate_scaling().await,
        ScalingDecision::ScaleUp { .. }
    ));
    assert_eq!(pool.worker(2).unwrap().model(), Some("en"));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_failed_scale_up_pauses_scaling() {
    let script = Script::new();
    script.set_delay(30);
    let mut config = latency_bound_config(4);
    config.pool.restart_backoff_base_ms = 5_000;
    config.pool.restart_backoff_max_ms = 10_000;
    let orch = common::start(config, &script).await;
    let pool = orch.pool();

    assert!(orch.synthesize(SynthesisRequest::new("warm up")).await.success);
    assert!(!pool.scaling_paused());

    script.set_fail_init(true);
    assert!(matches!(
        pool.evaluate_scaling().await,
        ScalingDecision::ScaleUp { .. }
    ));
    assert!(pool.scaling_paused());
    assert_eq!(script.engines_created(), 2);

    // Still overloaded, but the pause turns the scale-up into no change.
    let decision = pool.evaluate_scaling().await;
    assert!(matches!(decision, ScalingDecision::NoChange { .. }));
    assert_eq!(pool.last_decision(), Some(decision));
    assert_eq!(script.engines_created(), 2);

    orch.shutdown().await;
}
