//! Rolling per-worker request statistics.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
struct MetricsInner {
    latencies_ms: VecDeque<u64>,
    successes: u64,
    failures: u64,
}

/// Latency and outcome history used for scoring and scaling.
#[derive(Debug)]
pub struct WorkerMetrics {
    window: usize,
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub successes: u64,
    pub failures: u64,
}

impl WorkerMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            inner: Mutex::new(MetricsInner {
                latencies_ms: VecDeque::with_capacity(window),
                successes: 0,
                failures: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsInner> {
        self.inner.lock().expect("worker metrics mutex poisoned")
    }

    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.lock();
        inner.successes += 1;
        push_bounded(&mut inner.latencies_ms, latency.as_millis() as u64, self.window);
    }

    pub fn record_failure(&self, latency: Duration) {
        let mut inner = self.lock();
        inner.failures += 1;
        push_bounded(&mut inner.latencies_ms, latency.as_millis() as u64, self.window);
    }

    /// Mean of recent latencies, 0 with no history.
    pub fn avg_latency_ms(&self) -> f64 {
        let inner = self.lock();
        mean(&inner.latencies_ms)
    }

    /// Lifetime success ratio, 1.0 with no history.
    pub fn success_rate(&self) -> f64 {
        let inner = self.lock();
        rate(inner.successes, inner.failures)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        MetricsSnapshot {
            avg_latency_ms: mean(&inner.latencies_ms),
            success_rate: rate(inner.successes, inner.failures),
            successes: inner.successes,
            failures: inner.failures,
        }
    }
}

fn push_bounded(buf: &mut VecDeque<u64>, value: u64, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

fn mean(buf: &VecDeque<u64>) -> f64 {
    if buf.is_empty() {
        0.0
    } else {
        buf.iter().sum::<u64>() as f64 / buf.len() as f64
    }
}

fn rate(successes: u64, failures: u64) -> f64 {
    let total = successes + failures;
    if total == 0 {
        1.0
    } else {
        successes as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_history() {
        let m = WorkerMetrics::new(4);
        assert_eq!(m.avg_latency_ms(), 0.0);
        assert_eq!(m.success_rate(), 1.0);
    }

    #[test]
    fn test_latency_window() {
        let m = WorkerMetrics::new(2);
        m.record_success(Duration::from_millis(1000));
        m.record_success(Duration::from_millis(100));
        m.record_failure(Duration::from_millis(300));
        assert_eq!(m.avg_latency_ms(), 200.0);
        let snap = m.snapshot();
        assert_eq!(snap.successes, 2);
        assert_eq!(snap.failures, 1);
        assert!((snap.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
