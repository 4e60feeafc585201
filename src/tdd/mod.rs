//! Red/green/refactor phase orchestration.
//!
//! The red phase happens upstream and produces a [`FixTask`]. This module
//! drives the two phases that follow it:
//!
//! - [`GreenPhaseDelegator`] gets a specialist to make the failing test pass,
//!   retrying with failure feedback until attempts run out
//! - [`RefactorPhaseCoordinator`] asks for a quality pass over an accepted
//!   [`GreenResult`], once, with no retry
//!
//! Both phases end in a [`PhaseOutcome`].

pub mod green;
pub mod outcome;
pub mod prompts;
pub mod refactor;
pub mod state;
pub mod types;

pub use green::{FixValidation, GreenPhaseDelegator, GreenResult, allowed_paths};
pub use outcome::{AttemptRecord, Escalation, FailureKind, OutcomeKind, PhaseFailure, PhaseOutcome};
pub use refactor::{
    QualityMetrics, RefactorPhaseCoordinator, RefactorResult, SmellInstance, accepted_code_changes,
};
pub use state::{GreenState, PhaseState, RefactorState, StateTrail};
pub use types::{
    ChangeType, CodeChange, CodeSmell, CoverageBaseline, CoverageMetrics, FixTask, QualityTargets,
    RetryContext, TddPhase, TddState, TestChange, TestType,
};
