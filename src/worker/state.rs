//! Worker lifecycle state machine.
//!
//! ```text
//! INITIALIZING → READY ⇄ BUSY
//! READY / BUSY → UNHEALTHY → INITIALIZING
//! any non-terminal → SHUTTING_DOWN → TERMINATED
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Worker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Initializing = 0,
    Ready = 1,
    Busy = 2,
    Unhealthy = 3,
    ShuttingDown = 4,
    Terminated = 5,
}

impl From<u8> for WorkerState {
    fn from(val: u8) -> Self {
        match val {
            0 => WorkerState::Initializing,
            1 => WorkerState::Ready,
            2 => WorkerState::Busy,
            3 => WorkerState::Unhealthy,
            4 => WorkerState::ShuttingDown,
            _ => WorkerState::Terminated,
        }
    }
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Ready => "ready",
            WorkerState::Busy => "busy",
            WorkerState::Unhealthy => "unhealthy",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Terminated => "terminated",
        }
    }

    /// Whether the worker still counts toward the pool size.
    pub fn is_active(&self) -> bool {
        !matches!(self, WorkerState::ShuttingDown | WorkerState::Terminated)
    }

    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Initializing, Ready)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready, Unhealthy)
                | (Busy, Unhealthy)
                | (Unhealthy, Initializing)
                | (Initializing, ShuttingDown)
                | (Ready, ShuttingDown)
                | (Busy, ShuttingDown)
                | (Unhealthy, ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: WorkerState,
    pub to: WorkerState,
}

/// Lock-free holder for a [`WorkerState`].
#[derive(Debug)]
pub struct AtomicWorkerState(AtomicU8);

impl AtomicWorkerState {
    pub fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> WorkerState {
        WorkerState::from(self.0.load(Ordering::Acquire))
    }

    /// Move from exactly `from` to `to`.
    ///
    /// Fails if the transition is illegal or the current state is not `from`.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), InvalidTransition> {
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| InvalidTransition {
                from: WorkerState::from(actual),
                to,
            })
    }

    /// Move from whatever the current state is to `to`, if legal.
    pub fn transition_any(&self, to: WorkerState) -> Result<WorkerState, InvalidTransition> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = WorkerState::from(current);
            if !from.can_transition_to(to) {
                return Err(InvalidTransition { from, to });
            }
            match self
                .0
                .compare_exchange_weak(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_path() {
        let s = AtomicWorkerState::new(WorkerState::Initializing);
        s.transition(WorkerState::Initializing, WorkerState::Ready).unwrap();
        s.transition(WorkerState::Ready, WorkerState::Busy).unwrap();
        s.transition(WorkerState::Busy, WorkerState::Unhealthy).unwrap();
        s.transition(WorkerState::Unhealthy, WorkerState::Initializing).unwrap();
        assert_eq!(s.transition_any(WorkerState::ShuttingDown), Ok(WorkerState::Initializing));
        s.transition(WorkerState::ShuttingDown, WorkerState::Terminated).unwrap();
        assert_eq!(s.load(), WorkerState::Terminated);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let s = AtomicWorkerState::new(WorkerState::Initializing);
        assert!(s.transition(WorkerState::Initializing, WorkerState::Busy).is_err());
        assert!(s.transition_any(WorkerState::Terminated).is_err());

        s.transition(WorkerState::Initializing, WorkerState::Ready).unwrap();
        // Stale expectation: the worker is no longer initializing.
        let err = s.transition(WorkerState::Initializing, WorkerState::Ready).unwrap_err();
        assert_eq!(err.from, WorkerState::Ready);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let s = AtomicWorkerState::new(WorkerState::Terminated);
        for to in [
            WorkerState::Initializing,
            WorkerState::Ready,
            WorkerState::Busy,
            WorkerState::ShuttingDown,
        ] {
            assert!(s.transition_any(to).is_err());
        }
        assert!(!WorkerState::Terminated.is_active());
    }
}
