//! Scaling policy.
//!
//! Pure decision function over a snapshot of pool load; the pool manager
//! carries out the decision.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PoolConfig;

/// Outcome of one scaling evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScalingDecision {
    ScaleUp { target: usize },
    ScaleDown { target: usize },
    NoChange { target: usize },
}

impl ScalingDecision {
    pub fn target(&self) -> usize {
        match *self {
            ScalingDecision::ScaleUp { target }
            | ScalingDecision::ScaleDown { target }
            | ScalingDecision::NoChange { target } => target,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingDecision::ScaleUp { .. } => "scale_up",
            ScalingDecision::ScaleDown { .. } => "scale_down",
            ScalingDecision::NoChange { .. } => "no_change",
        }
    }
}

/// Load observed at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingInputs {
    pub queue_depth: usize,
    pub avg_latency_ms: f64,
    /// Longest idle time among READY workers.
    pub longest_idle: Duration,
    pub active_workers: usize,
}

#[derive(Debug, Clone)]
pub struct Scaler {
    config: PoolConfig,
}

impl Scaler {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Decide the next pool size. Moves by at most one worker.
    pub fn evaluate(&self, inputs: &ScalingInputs) -> ScalingDecision {
        let c = &self.config;
        let active = inputs.active_workers;

        if active < c.min_workers {
            return ScalingDecision::ScaleUp { target: active + 1 };
        }

        let overloaded = inputs.queue_depth > c.scale_up_threshold
            || inputs.avg_latency_ms > c.target_latency_ms as f64;
        if overloaded && active < c.max_workers {
            return ScalingDecision::ScaleUp { target: active + 1 };
        }

        let idle = inputs.queue_depth == 0
            && inputs.avg_latency_ms < c.low_latency_threshold_ms as f64
            && inputs.longest_idle > Duration::from_millis(c.scale_down_idle_threshold_ms);
        if idle && active > c.min_workers {
            return ScalingDecision::ScaleDown { target: active - 1 };
        }

        ScalingDecision::NoChange { target: active }
    }
}
