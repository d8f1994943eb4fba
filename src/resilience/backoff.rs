//! Exponential backoff with jitter.

use rand::Rng;
use std::time::{Duration, Instant};

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Tracks consecutive failures of an operation and the pause they imply.
///
/// Used to throttle scaling and restart attempts after repeated failures
/// instead of retrying on every tick.
#[derive(Debug)]
pub struct BackoffGate {
    base_ms: u64,
    max_ms: u64,
    failures: u32,
    paused_until: Option<Instant>,
}

impl BackoffGate {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            failures: 0,
            paused_until: None,
        }
    }

    /// Record a failure and return the pause now in effect.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = calculate_backoff(self.failures, self.base_ms, self.max_ms);
        self.paused_until = Some(Instant::now() + delay);
        delay
    }

    /// Clear the failure streak.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.paused_until = None;
    }

    pub fn is_paused(&self) -> bool {
        self.paused_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> Duration {
        self.paused_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
