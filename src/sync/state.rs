//! Run state machine.
//!
//! ```text
//! Idle -> Fetching -> Normalizing -> Threading -> Persisting -> Done
//!            \______________________/
//!               (no message normalized)
//! ```
//!
//! `Cancelled` and `Failed` are reachable from every non-terminal state.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Threading,
    Persisting,
    Done,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Cancelled | RunState::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Cancelled | Failed => true,
            Fetching => self == Idle,
            Normalizing => self == Fetching,
            Threading => matches!(self, Fetching | Normalizing),
            Persisting => self == Threading,
            Done => self == Persisting,
            Idle => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Normalizing => "normalizing",
            RunState::Threading => "threading",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared, validated holder of the current [`RunState`].
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<RunState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn current(&self) -> RunState {
        *self.state.lock()
    }

    pub fn transition(&self, next: RunState) -> Result<RunState, PipelineError> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition { from, to: next });
        }
        *state = next;
        log::debug!("run state: {} -> {}", from, next);
        Ok(from)
    }

    /// Move from `from` to `to` only if the run is currently in `from`.
    pub fn advance(&self, from: RunState, to: RunState) -> bool {
        let mut state = self.state.lock();
        if *state == from && from.can_transition_to(to) {
            *state = to;
            log::debug!("run state: {} -> {}", from, to);
            true
        } else {
            false
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
