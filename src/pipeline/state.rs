//! Pump state management

use std::time::{Duration, Instant};

/// Pump state machine
///
/// A pump can be started again after it stopped, so `Stopped` is not
/// terminal. `Running` is the only state in which a tick task exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Pump was created and never started
    Idle,

    /// Pump is ticking
    Running {
        /// When the current run started
        started_at: Instant,
        /// Interval between ticks of the current run
        cadence: Duration,
    },

    /// Pump was stopped and can be started again
    Stopped {
        /// When the last run stopped
        stopped_at: Instant,
    },
}

impl PumpState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PumpState) -> bool {
        use PumpState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            (Running { .. }, Stopped { .. }) => true,
            (Stopped { .. }, Running { .. }) => true,

            // Nothing goes back to Idle, a running pump has to stop first
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PumpState::Idle => "Idle",
            PumpState::Running { .. } => "Running",
            PumpState::Stopped { .. } => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PumpState::Running { .. })
    }

    /// Cadence of the current run
    pub fn cadence(&self) -> Option<Duration> {
        match self {
            PumpState::Running { cadence, .. } => Some(*cadence),
            _ => None,
        }
    }
}

impl std::fmt::Display for PumpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
