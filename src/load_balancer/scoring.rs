//! Score-based worker selection.

use std::cmp::Ordering;

use crate::load_balancer::{LoadBalancer, RequestProfile, WorkerSnapshot};
use crate::request::Priority;

/// Selects the eligible worker with the highest score.
///
/// ```text
/// score = 100 - queueDepth*10 - responseTimeMs/10 + successRate*20
///       + (model match ? 30 : -10) + (priority high ? 25 : 0)
/// ```
///
/// Ties go to the lowest queue depth, then the lowest worker id.
#[derive(Debug, Default)]
pub struct ScoringBalancer;

impl ScoringBalancer {
    pub fn new() -> Self {
        Self
    }
}

pub fn score(worker: &WorkerSnapshot, profile: &RequestProfile) -> f64 {
    let affinity = if worker.model == profile.model { 30.0 } else { -10.0 };
    let urgency = if profile.priority == Priority::High { 25.0 } else { 0.0 };

    100.0 - worker.queue_depth as f64 * 10.0 - worker.avg_latency_ms / 10.0
        + worker.success_rate * 20.0
        + affinity
        + urgency
}

impl LoadBalancer for ScoringBalancer {
    fn select(&self, candidates: &[WorkerSnapshot], profile: &RequestProfile) -> Option<u64> {
        candidates
            .iter()
            .map(|w| (score(w, profile), w))
            .max_by(|(sa, a), (sb, b)| {
                sa.partial_cmp(sb)
                    .unwrap_or(Ordering::Equal)
                    // Reversed: the smaller depth / id must compare as "greater".
                    .then_with(|| b.queue_depth.cmp(&a.queue_depth))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(_, w)| w.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: u64, depth: usize, latency: f64, model: Option<&str>) -> WorkerSnapshot {
        WorkerSnapshot {
            id,
            queue_depth: depth,
            avg_latency_ms: latency,
            success_rate: 1.0,
            model: model.map(str::to_string),
        }
    }

    fn profile(model: Option<&str>, priority: Priority) -> RequestProfile {
        RequestProfile {
            model: model.map(str::to_string),
            priority,
        }
    }

    #[test]
    fn test_model_affinity_wins() {
        let lb = ScoringBalancer::new();
        let a = worker(1, 0, 0.0, Some("en"));
        let b = worker(2, 0, 0.0, Some("fr"));
        let p = profile(Some("fr"), Priority::Normal);

        assert_eq!(score(&a, &p), 100.0 + 20.0 - 10.0);
        assert_eq!(score(&b, &p), 100.0 + 20.0 + 30.0);
        assert_eq!(lb.select(&[a, b], &p), Some(2));
    }

    #[test]
    fn test_latency_and_depth_penalties() {
        let lb = ScoringBalancer::new();
        let fast = worker(1, 0, 100.0, None);
        let slow = worker(2, 0, 900.0, None);
        let p = profile(None, Priority::Normal);
        assert_eq!(lb.select(&[slow.clone(), fast.clone()], &p), Some(1));

        // 1 pending request costs as much as 100ms of latency.
        let busy = worker(3, 1, 0.0, None);
        assert_eq!(score(&busy, &p), score(&fast, &p));
    }

    #[test]
    fn test_high_priority_bonus() {
        let w = worker(1, 0, 0.0, None);
        let normal = score(&w, &profile(None, Priority::Normal));
        let high = score(&w, &profile(None, Priority::High));
        assert_eq!(high - normal, 25.0);
    }

    #[test]
    fn test_tie_breaks_deterministic() {
        let lb = ScoringBalancer::new();
        let p = profile(None, Priority::Normal);

        // Equal scores, different depth: lower depth wins.
        let a = worker(1, 1, 0.0, None);
        let b = worker(2, 0, 100.0, None);
        assert_eq!(score(&a, &p), score(&b, &p));
        assert_eq!(lb.select(&[a, b], &p), Some(2));

        // Fully equal: lowest id wins regardless of order.
        let c = worker(7, 0, 0.0, None);
        let d = worker(3, 0, 0.0, None);
        assert_eq!(lb.select(&[c, d], &p), Some(3));
    }

    #[test]
    fn test_empty_candidates() {
        let lb = ScoringBalancer::new();
        assert_eq!(lb.select(&[], &profile(None, Priority::Low)), None);
    }
}
