//! Phase state machines.
//!
//! Green: `Pending → Delegating → Validating → {Success | Retrying → Delegating | Escalated}`.
//! Gateway failures may also move `Delegating` straight to `Retrying` or `Escalated`.
//!
//! Refactor: `Pending → Delegating → Validating → {Success | Failed}`, with
//! `Delegating → Failed` when the gateway call itself fails.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// A state in one of the phase state machines.
pub trait PhaseState: Copy + Eq + fmt::Debug + fmt::Display {
    fn can_transition_to(self, next: Self) -> bool;
    fn is_terminal(self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreenState {
    #[default]
    Pending,
    Delegating,
    Validating,
    Retrying,
    Success,
    Escalated,
}

impl PhaseState for GreenState {
    fn can_transition_to(self, next: Self) -> bool {
        use GreenState::*;
        matches!(
            (self, next),
            (Pending, Delegating)
                | (Delegating, Validating)
                | (Delegating, Retrying)
                | (Delegating, Escalated)
                | (Validating, Success)
                | (Validating, Retrying)
                | (Validating, Escalated)
                | (Retrying, Delegating)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Escalated)
    }
}

impl fmt::Display for GreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Delegating => "DELEGATING",
            Self::Validating => "VALIDATING",
            Self::Retrying => "RETRYING",
            Self::Success => "SUCCESS",
            Self::Escalated => "ESCALATED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactorState {
    #[default]
    Pending,
    Delegating,
    Validating,
    Success,
    Failed,
}

impl PhaseState for RefactorState {
    fn can_transition_to(self, next: Self) -> bool {
        use RefactorState::*;
        matches!(
            (self, next),
            (Pending, Delegating)
                | (Delegating, Validating)
                | (Delegating, Failed)
                | (Validating, Success)
                | (Validating, Failed)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for RefactorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Delegating => "DELEGATING",
            Self::Validating => "VALIDATING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone)]
pub struct StateTrail<S: PhaseState> {
    current: S,
    visited: Vec<S>,
}

impl<S: PhaseState + Default> Default for StateTrail<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: PhaseState> StateTrail<S> {
    pub fn new(initial: S) -> Self {
        Self {
            current: initial,
            visited: vec![initial],
        }
    }

    pub fn current(&self) -> S {
        self.current
    }

    pub fn visited(&self) -> &[S] {
        &self.visited
    }

    /// Display names of the visited states, for results and audit records.
    pub fn names(&self) -> Vec<String> {
        self.visited.iter().map(ToString::to_string).collect()
    }

    /// Move to `next`. Returns false, leaving the state unchanged, when the
    /// transition is not part of the machine.
    pub fn transition(&mut self, next: S) -> bool {
        if !self.current.can_transition_to(next) {
            debug_assert!(false, "illegal transition {} -> {}", self.current, next);
            return false;
        }
        debug!(from = %self.current, to = %next, "Phase transition");
        self.current = next;
        self.visited.push(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_green_happy_path() {
        let mut trail = StateTrail::<GreenState>::default();
        assert!(trail.transition(GreenState::Delegating));
        assert!(trail.transition(GreenState::Validating));
        assert!(trail.transition(GreenState::Success));
        assert!(trail.current().is_terminal());
        assert_eq!(trail.visited().len(), 4);
        assert_eq!(trail.names(), vec!["PENDING", "DELEGATING", "VALIDATING", "SUCCESS"]);
    }

    #[test]
    fn test_green_retry_loop() {
        let mut trail = StateTrail::<GreenState>::default();
        for state in [
            GreenState::Delegating,
            GreenState::Retrying,
            GreenState::Delegating,
            GreenState::Validating,
            GreenState::Escalated,
        ] {
            assert!(trail.transition(state));
        }
        assert_eq!(trail.current(), GreenState::Escalated);
    }

    #[test]
    fn test_rejected_transition_is_not_recorded() {
        let mut trail = StateTrail::<RefactorState>::default();
        assert!(trail.transition(RefactorState::Delegating));
        assert!(trail.transition(RefactorState::Failed));
        if cfg!(not(debug_assertions)) {
            assert!(!trail.transition(RefactorState::Delegating));
            assert_eq!(trail.names(), vec!["PENDING", "DELEGATING", "FAILED"]);
        }
        assert_eq!(trail.current(), RefactorState::Failed);
    }

    #[test]
    fn test_green_illegal_transitions() {
        use GreenState::*;
        assert!(!Pending.can_transition_to(Success));
        assert!(!Retrying.can_transition_to(Validating));
        assert!(!Success.can_transition_to(Delegating));
        assert!(!Escalated.can_transition_to(Retrying));
        assert!(!Delegating.can_transition_to(Success));
    }

    #[test]
    fn test_refactor_has_no_retry() {
        use RefactorState::*;
        assert!(Pending.can_transition_to(Delegating));
        assert!(Delegating.can_transition_to(Failed));
        assert!(Validating.can_transition_to(Success));
        assert!(!Failed.can_transition_to(Delegating));
        assert!(!Validating.can_transition_to(Delegating));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(GreenState::Retrying.to_string(), "RETRYING");
        assert_eq!(RefactorState::Failed.to_string(), "FAILED");
    }
}
