//! Side-channel observers of executor state transitions.
//!
//! Hooks never influence the outcome of an attempt. They exist for debug
//! tooling (screenshots, timing analysis) and for tests.

use log::debug;
use std::sync::Mutex;
use std::time::Duration;

use crate::booking::types::ExecutorState;
use crate::configuration::types::CourtNumber;

pub trait StepHook: Send + Sync {
    /// Called on entering `state`, `elapsed` after the attempt started.
    fn on_transition(&self, court: CourtNumber, state: ExecutorState, elapsed: Duration);
}

/// Default hook: one debug line per transition.
#[derive(Debug, Default)]
pub struct LoggingHook;

impl StepHook for LoggingHook {
    fn on_transition(&self, court: CourtNumber, state: ExecutorState, elapsed: Duration) {
        debug!(
            "Court {} -> {} (+{}ms)",
            court,
            state,
            elapsed.as_millis()
        );
    }
}

/// Keeps every transition in memory.
#[derive(Debug, Default)]
pub struct StepRecorder {
    transitions: Mutex<Vec<(CourtNumber, ExecutorState)>>,
}

impl StepRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<(CourtNumber, ExecutorState)> {
        self.transitions
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn states_for(&self, court: CourtNumber) -> Vec<ExecutorState> {
        self.transitions()
            .into_iter()
            .filter(|(c, _)| *c == court)
            .map(|(_, state)| state)
            .collect()
    }
}

impl StepHook for StepRecorder {
    fn on_transition(&self, court: CourtNumber, state: ExecutorState, _elapsed: Duration) {
        if let Ok(mut transitions) = self.transitions.lock() {
            transitions.push((court, state));
        }
    }
}
