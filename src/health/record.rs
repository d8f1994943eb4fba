//! Per-worker health record.
//!
//! Fed by active probes and by request outcomes reported by the worker
//! (passive checks). The score combines both.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct RecordInner {
    consecutive_failures: u32,
    created_at: Instant,
    last_probe: Option<Instant>,
    last_success: Option<Instant>,
    response_times_ms: VecDeque<u64>,
    outcomes: VecDeque<bool>,
}

/// Health history for one worker.
#[derive(Debug)]
pub struct HealthRecord {
    worker_id: u64,
    window: usize,
    interval: Duration,
    inner: Mutex<RecordInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub score: f64,
    pub consecutive_failures: u32,
    pub avg_response_ms: f64,
    pub last_probe_ms_ago: Option<u64>,
    pub last_success_ms_ago: Option<u64>,
}

impl HealthRecord {
    pub fn new(worker_id: u64, window: usize, interval: Duration) -> Self {
        Self {
            worker_id,
            window: window.max(1),
            interval,
            inner: Mutex::new(RecordInner {
                consecutive_failures: 0,
                created_at: Instant::now(),
                last_probe: None,
                last_success: None,
                response_times_ms: VecDeque::with_capacity(window),
                outcomes: VecDeque::with_capacity(window),
            }),
        }
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordInner> {
        self.inner.lock().expect("health record mutex poisoned")
    }

    /// Record an active probe result.
    pub fn record_probe(&self, ok: bool, elapsed: Duration) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.last_probe = Some(now);
        self.apply(&mut inner, ok, elapsed, now);
    }

    /// Record the outcome of a request served by the worker.
    pub fn record_outcome(&self, ok: bool, latency: Duration) {
        let mut inner = self.lock();
        self.apply(&mut inner, ok, latency, Instant::now());
    }

    fn apply(&self, inner: &mut RecordInner, ok: bool, elapsed: Duration, now: Instant) {
        if ok {
            inner.consecutive_failures = 0;
            inner.last_success = Some(now);
            inner.response_times_ms.push_back(elapsed.as_millis() as u64);
            while inner.response_times_ms.len() > self.window {
                inner.response_times_ms.pop_front();
            }
        } else {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        }
        inner.outcomes.push_back(ok);
        while inner.outcomes.len() > self.window {
            inner.outcomes.pop_front();
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Health score in `[0, 100]`.
    ///
    /// ```text
    /// 100 * successRate
    ///   - min(consecutiveFailures * 20, 80)
    ///   - min(avgResponseMs / 50, 20)
    ///   - min(5 * missedIntervals, 20)
    /// ```
    pub fn score(&self) -> f64 {
        let inner = self.lock();
        self.score_locked(&inner, Instant::now())
    }

    fn score_locked(&self, inner: &RecordInner, now: Instant) -> f64 {
        let success_rate = if inner.outcomes.is_empty() {
            1.0
        } else {
            inner.outcomes.iter().filter(|ok| **ok).count() as f64 / inner.outcomes.len() as f64
        };
        let failure_penalty = (inner.consecutive_failures as f64 * 20.0).min(80.0);
        let response_penalty = (avg(&inner.response_times_ms) / 50.0).min(20.0);
        let staleness_penalty = (5.0 * self.missed_intervals(inner, now) as f64).min(20.0);

        (100.0 * success_rate - failure_penalty - response_penalty - staleness_penalty).clamp(0.0, 100.0)
    }

    /// Whole probe intervals that passed without a success, not counting the
    /// one currently in progress.
    fn missed_intervals(&self, inner: &RecordInner, now: Instant) -> u64 {
        if self.interval.is_zero() {
            return 0;
        }
        let since = inner.last_success.unwrap_or(inner.created_at);
        let elapsed = now.saturating_duration_since(since);
        ((elapsed.as_millis() / self.interval.as_millis()) as u64).saturating_sub(1)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        HealthSnapshot {
            score: self.score_locked(&inner, now),
            consecutive_failures: inner.consecutive_failures,
            avg_response_ms: avg(&inner.response_times_ms),
            last_probe_ms_ago: inner
                .last_probe
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            last_success_ms_ago: inner
                .last_success
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }
}

fn avg(buf: &VecDeque<u64>) -> f64 {
    if buf.is_empty() {
        0.0
    } else {
        buf.iter().sum::<u64>() as f64 / buf.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> HealthRecord {
        HealthRecord::new(1, 10, Duration::from_secs(60))
    }

    #[test]
    fn test_fresh_record_is_fully_healthy() {
        assert_eq!(record().score(), 100.0);
    }

    #[test]
    fn test_failures_reduce_score() {
        let r = record();
        for _ in 0..3 {
            r.record_probe(true, Duration::from_millis(10));
        }
        r.record_probe(false, Duration::from_millis(2000));
        // 75 - 20 - 0.2
        assert!((r.score() - 54.8).abs() < 1e-6);
        assert_eq!(r.consecutive_failures(), 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let r = record();
        r.record_outcome(false, Duration::from_millis(5));
        r.record_outcome(false, Duration::from_millis(5));
        assert_eq!(r.consecutive_failures(), 2);
        r.record_outcome(true, Duration::from_millis(5));
        assert_eq!(r.consecutive_failures(), 0);
    }

    #[test]
    fn test_score_clamped() {
        let r = record();
        for _ in 0..10 {
            r.record_probe(false, Duration::from_millis(5));
        }
        assert_eq!(r.score(), 0.0);
    }

    #[test]
    fn test_slow_responses_penalised() {
        let r = record();
        r.record_probe(true, Duration::from_millis(5000));
        assert_eq!(r.score(), 80.0);
    }

    #[test]
    fn test_staleness_penalty() {
        let r = HealthRecord::new(1, 10, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(45));
        // At least three missed intervals.
        assert!(r.score() <= 85.0);
        assert!(r.snapshot().last_success_ms_ago.is_none());
    }
}
