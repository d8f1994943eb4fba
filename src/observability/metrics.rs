//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define orchestrator metrics (requests, latency, pool, breakers, queue)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-worker and aggregate metrics
//!
//! # Metrics
//! - `synth_requests_total` (counter): requests by outcome code
//! - `synth_request_duration_seconds` (histogram): end-to-end latency
//! - `synth_worker_state` (gauge): numeric worker state per worker
//! - `synth_breaker_state` (gauge): 0=closed, 1=half_open, 2=open per worker
//! - `synth_health_score` (gauge): 0..100 per worker
//! - `synth_queue_depth` (gauge): pending requests
//! - `synth_pool_size` (gauge): live workers
//! - `synth_scaling_decisions_total` (counter): decisions by direction
//! - `synth_worker_restarts_total` (counter): restarts by outcome
//! - `synth_cache_events_total` (counter): hits and misses
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels carry the worker id, never request content

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::BreakerState;
use crate::worker::WorkerState;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, start: Instant) {
    metrics::counter!("synth_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("synth_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_worker_state(worker_id: u64, state: WorkerState) {
    metrics::gauge!("synth_worker_state", "worker" => worker_id.to_string()).set(state as u8 as f64);
}

pub fn record_breaker_state(worker_id: u64, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    metrics::gauge!("synth_breaker_state", "worker" => worker_id.to_string()).set(value);
}

pub fn record_health_score(worker_id: u64, score: f64) {
    metrics::gauge!("synth_health_score", "worker" => worker_id.to_string()).set(score);
}

pub fn record_queue_depth(depth: usize) {
    metrics::gauge!("synth_queue_depth").set(depth as f64);
}

pub fn record_pool_size(size: usize) {
    metrics::gauge!("synth_pool_size").set(size as f64);
}

pub fn record_scaling(direction: &'static str) {
    metrics::counter!("synth_scaling_decisions_total", "direction" => direction).increment(1);
}

pub fn record_restart(outcome: &'static str) {
    metrics::counter!("synth_worker_restarts_total", "outcome" => outcome).increment(1);
}

pub fn record_cache(hit: bool) {
    let event = if hit { "hit" } else { "miss" };
    metrics::counter!("synth_cache_events_total", "event" => event).increment(1);
}
