//! Audit trail of TDD sessions.
//!
//! A [`TddAuditRun`] covers one session and holds a [`PhaseAudit`] per phase
//! that ran. Runs are plain values; the host decides where, if anywhere,
//! they are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::tdd::green::GreenResult;
use crate::tdd::outcome::{AttemptRecord, OutcomeKind, PhaseOutcome};
use crate::tdd::refactor::RefactorResult;
use crate::tdd::types::{ChangeType, CodeChange, TddPhase};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TddAuditRun {
    pub run_id: Uuid,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub phases: Vec<PhaseAudit>,
}

impl TddAuditRun {
    pub fn new(session_id: &str, config: RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            phases: Vec::new(),
        }
    }

    pub fn record(&mut self, phase: PhaseAudit) {
        debug!(phase = ?phase.phase, outcome = %phase.outcome, "Recording phase audit");
        self.phases.push(phase);
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Outcome of the most recent audit for `phase`, if it ran.
    pub fn outcome_of(&self, phase: TddPhase) -> Option<OutcomeKind> {
        self.phases
            .iter()
            .rev()
            .find(|p| p.phase == phase)
            .map(|p| p.outcome)
    }
}

/// Settings the session ran with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub allow_coverage_regression: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseAudit {
    pub phase: TddPhase,
    pub recorded_at: DateTime<Utc>,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Failed attempts, oldest first.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// State machine path the phase took.
    #[serde(default)]
    pub states: Vec<String>,
    pub file_changes: FileChangeSummary,
}

impl PhaseAudit {
    /// Record a phase outcome together with the changes it left standing.
    pub fn from_outcome<T>(
        phase: TddPhase,
        outcome: &PhaseOutcome<T>,
        changes: &[CodeChange],
        success_states: &[String],
    ) -> Self {
        let states = match outcome {
            PhaseOutcome::Success(_) => success_states,
            _ => outcome.failure_states(),
        };
        Self {
            phase,
            recorded_at: Utc::now(),
            outcome: outcome.kind(),
            failure_reason: outcome.failure_reason().map(str::to_string),
            attempts: outcome.attempts().to_vec(),
            states: states.to_vec(),
            file_changes: FileChangeSummary::from_changes(changes),
        }
    }

    pub fn green(outcome: &PhaseOutcome<GreenResult>) -> Self {
        let (changes, states) = outcome
            .success()
            .map(|r| (r.code_changes.as_slice(), r.states.as_slice()))
            .unwrap_or_default();
        Self::from_outcome(TddPhase::Green, outcome, changes, states)
    }

    pub fn refactor(outcome: &PhaseOutcome<RefactorResult>) -> Self {
        let (changes, states) = outcome
            .success()
            .map(|r| (r.code_changes.as_slice(), r.states.as_slice()))
            .unwrap_or_default();
        Self::from_outcome(TddPhase::Refactor, outcome, changes, states)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileChangeSummary {
    pub files_added: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_deleted: Vec<String>,
    pub total_lines_added: u64,
    pub total_lines_removed: u64,
}

impl FileChangeSummary {
    pub fn from_changes(changes: &[CodeChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            let bucket = match change.change_type {
                ChangeType::Added => &mut summary.files_added,
                ChangeType::Deleted => &mut summary.files_deleted,
                _ => &mut summary.files_modified,
            };
            bucket.push(change.path.clone());
            summary.total_lines_added += u64::from(change.lines_added);
            summary.total_lines_removed += u64::from(change.lines_removed);
        }
        summary
    }

    pub fn total_files(&self) -> usize {
        self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }
}
