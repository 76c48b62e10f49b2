//! Session state machine.
//!
//! Tracks where a measurement session is in its phase list and refuses any
//! step that would run phases out of order or overlap them.
//!
//! # States
//!
//! - `Idle`: no session; initial state and the state re-entered after any
//!   terminal outcome
//! - `Preparing(i)`: configuring the instrument for phase `i`
//! - `Measuring(i)`: collecting samples for phase `i`
//! - `Waiting(i)`: inter-phase wait after phase `i`
//! - `Completed`, `Error`, `Aborted`: terminal outcomes
//!
//! # Valid Transitions
//!
//! - Idle → Preparing(0)
//! - Preparing(i) → Measuring(i) | Error | Aborted
//! - Measuring(i) → Waiting(i) (not last) | Completed (last) | Error | Aborted
//! - Waiting(i) → Preparing(i+1) | Aborted
//! - Completed | Error | Aborted → Idle
//!
//! # Examples
//!
//! ```
//! use benchline_sequencer::{SequenceState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! machine.begin(2).unwrap();
//! machine.transition_to(SequenceState::Measuring(0)).unwrap();
//! machine.transition_to(SequenceState::Waiting(0)).unwrap();
//!
//! // Phase 1 cannot start measuring before it was prepared
//! assert!(machine.transition_to(SequenceState::Measuring(1)).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use benchline_core::constants::MAX_HISTORY_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Position of the sequencer within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    #[default]
    Idle,
    Preparing(usize),
    Measuring(usize),
    Waiting(usize),
    Completed,
    Error,
    Aborted,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceState::Preparing(i)
            | SequenceState::Measuring(i)
            | SequenceState::Waiting(i) => write!(f, "{}({})", self.name(), i),
            _ => write!(f, "{}", self.name()),
        }
    }
}

impl SequenceState {
    /// State name without the phase index.
    pub fn name(&self) -> &'static str {
        match self {
            SequenceState::Idle => "Idle",
            SequenceState::Preparing(_) => "Preparing",
            SequenceState::Measuring(_) => "Measuring",
            SequenceState::Waiting(_) => "Waiting",
            SequenceState::Completed => "Completed",
            SequenceState::Error => "Error",
            SequenceState::Aborted => "Aborted",
        }
    }

    /// Index of the phase this state refers to, if any.
    pub fn phase_index(&self) -> Option<usize> {
        match self {
            SequenceState::Preparing(i)
            | SequenceState::Measuring(i)
            | SequenceState::Waiting(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceState::Completed | SequenceState::Error | SequenceState::Aborted
        )
    }

    /// Check if `target` may follow this state in a session of `phase_count` phases.
    ///
    /// # Examples
    ///
    /// ```
    /// use benchline_sequencer::SequenceState;
    ///
    /// assert!(SequenceState::Measuring(2).can_transition_to(&SequenceState::Completed, 3));
    /// assert!(!SequenceState::Measuring(1).can_transition_to(&SequenceState::Completed, 3));
    /// assert!(SequenceState::Waiting(0).can_transition_to(&SequenceState::Preparing(1), 3));
    /// ```
    pub fn can_transition_to(&self, target: &SequenceState, phase_count: usize) -> bool {
        use SequenceState::*;

        match (*self, *target) {
            (Idle, Preparing(0)) => phase_count > 0,
            (Preparing(i), Measuring(j)) => i == j,
            (Preparing(_), Error | Aborted) => true,
            (Measuring(i), Waiting(j)) => i == j && i + 1 < phase_count,
            (Measuring(i), Completed) => i + 1 == phase_count,
            (Measuring(_), Error | Aborted) => true,
            (Waiting(i), Preparing(j)) => j == i + 1 && j < phase_count,
            (Waiting(_), Aborted) => true,
            (Completed | Error | Aborted, Idle) => true,
            _ => false,
        }
    }
}

/// A single state change with the time it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SequenceState,
    pub to: SequenceState,

    /// Not serialized; deserialized records carry the time of deserialization.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: SequenceState, to: SequenceState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Enforces phase ordering for one station.
///
/// Not thread-safe; the orchestrator owns one per running session.
#[derive(Debug)]
pub struct StateMachine {
    current_state: SequenceState,
    phase_count: usize,
    state_entered_at: Instant,

    /// Most recent transitions, capped at `MAX_HISTORY_SIZE`.
    history: VecDeque<StateTransition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a machine in the `Idle` state.
    pub fn new() -> Self {
        Self {
            current_state: SequenceState::Idle,
            phase_count: 0,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> &SequenceState {
        &self.current_state
    }

    /// Number of phases of the session in progress.
    pub fn phase_count(&self) -> usize {
        self.phase_count
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Start a session of `phase_count` phases: `Idle → Preparing(0)`.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::InvalidTransition` when the machine is not
    /// idle or `phase_count` is zero.
    pub fn begin(&mut self, phase_count: usize) -> Result<StateTransition> {
        if self.current_state != SequenceState::Idle || phase_count == 0 {
            return Err(OrchestratorError::InvalidTransition {
                from: self.current_state.to_string(),
                to: SequenceState::Preparing(0).to_string(),
            });
        }
        self.phase_count = phase_count;
        self.transition_to(SequenceState::Preparing(0))
    }

    /// Move to `new_state` if the transition rules allow it.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::InvalidTransition` and leaves the state
    /// unchanged if the transition is not valid.
    pub fn transition_to(&mut self, new_state: SequenceState) -> Result<StateTransition> {
        if !self
            .current_state
            .can_transition_to(&new_state, self.phase_count)
        {
            return Err(OrchestratorError::InvalidTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.perform_state_change(new_state, transition.clone());
        Ok(transition)
    }

    /// Return to `Idle` from a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::InvalidTransition` while a session is still
    /// running.
    pub fn reset(&mut self) -> Result<StateTransition> {
        let transition = self.transition_to(SequenceState::Idle)?;
        self.phase_count = 0;
        Ok(transition)
    }

    fn perform_state_change(&mut self, new_state: SequenceState, transition: StateTransition) {
        self.current_state = new_state;
        self.state_entered_at = transition.timestamp;

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }
}
