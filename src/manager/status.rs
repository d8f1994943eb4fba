//! Status report and request counters.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::CacheStats;
use crate::pool::ScalingDecision;
use crate::worker::WorkerStatus;

/// Full orchestrator status, as served by `GET /admin/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub protocol_version: String,
    pub supported_versions: Vec<String>,
    pub accepting: bool,
    pub uptime_secs: u64,
    pub pool: PoolStatus,
    pub workers: Vec<WorkerStatus>,
    pub requests: RequestStats,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub size: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_depth: usize,
    pub oldest_wait_ms: Option<u64>,
    pub scaling_paused: bool,
    pub last_decision: Option<ScalingDecision>,
    pub exhausted: bool,
    /// Requests seen per model tag.
    pub demand: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub cache_hits: u64,
    pub in_flight: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RequestCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cache_hits: AtomicU64,
}

impl RequestCounters {
    pub(crate) fn record(&self, success: bool, cache_hit: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, in_flight: u64) -> RequestStats {
        RequestStats {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let c = RequestCounters::default();
        c.record(true, false);
        c.record(true, true);
        c.record(false, false);
        c.record_retry();
        let s = c.snapshot(2);
        assert_eq!(s.total, 3);
        assert_eq!(s.succeeded, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.retried, 1);
        assert_eq!(s.cache_hits, 1);
        assert_eq!(s.in_flight, 2);
    }
}
