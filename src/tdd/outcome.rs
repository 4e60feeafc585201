//! Terminal values of a phase and the attempt history behind them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DelegationErrorKind;
use crate::validation::ValidationResult;

/// Why a single delegation attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RetryableFault,
    FatalFault,
    Validation,
}

impl From<DelegationErrorKind> for FailureKind {
    fn from(kind: DelegationErrorKind) -> Self {
        match kind {
            DelegationErrorKind::Timeout => Self::Timeout,
            DelegationErrorKind::Retryable => Self::RetryableFault,
            DelegationErrorKind::Fatal => Self::FatalFault,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RetryableFault => write!(f, "retryable fault"),
            Self::FatalFault => write!(f, "fatal fault"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub kind: FailureKind,
    pub failure_reason: String,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(attempt: u32, kind: FailureKind, failure_reason: &str, elapsed_ms: u64) -> Self {
        Self {
            attempt,
            kind,
            failure_reason: failure_reason.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }
}

/// A phase that ended without success but without needing a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub failure_reason: String,
    /// The validation that failed, when the failure came from a check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub attempts: Vec<AttemptRecord>,
    /// States the phase passed through, in order.
    #[serde(default)]
    pub states: Vec<String>,
}

/// Terminal failure that needs a human or a higher-level orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: String,
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl Escalation {
    /// Every failure reason, oldest first.
    pub fn failure_reasons(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .map(|a| a.failure_reason.as_str())
            .collect()
    }

    /// Human-readable summary of the attempt history.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Escalated: {}", self.reason)];
        for record in &self.attempts {
            lines.push(format!(
                "  attempt {} ({}): {}",
                record.attempt, record.kind, record.failure_reason
            ));
        }
        lines.join("\n")
    }
}

/// Discriminant of a [`PhaseOutcome`], for logging and audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    ValidationFailed,
    Escalated,
    TimedOut,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::ValidationFailed => write!(f, "validation_failed"),
            Self::Escalated => write!(f, "escalated"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Terminal value of a phase. Set exactly once, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum PhaseOutcome<T> {
    Success(T),
    ValidationFailed(PhaseFailure),
    Escalated(Escalation),
    TimedOut(PhaseFailure),
}

impl<T> PhaseOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::ValidationFailed(_) => OutcomeKind::ValidationFailed,
            Self::Escalated(_) => OutcomeKind::Escalated,
            Self::TimedOut(_) => OutcomeKind::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn escalation(&self) -> Option<&Escalation> {
        match self {
            Self::Escalated(escalation) => Some(escalation),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::ValidationFailed(f) | Self::TimedOut(f) => Some(&f.failure_reason),
            Self::Escalated(e) => Some(&e.reason),
        }
    }

    /// States a failed phase passed through. Successful results carry their
    /// own trail.
    pub fn failure_states(&self) -> &[String] {
        match self {
            Self::Success(_) => &[],
            Self::ValidationFailed(f) | Self::TimedOut(f) => &f.states,
            Self::Escalated(e) => &e.states,
        }
    }

    /// Failed attempts recorded before the outcome was reached.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Success(_) => &[],
            Self::ValidationFailed(f) | Self::TimedOut(f) => &f.attempts,
            Self::Escalated(e) => &e.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escalation() -> Escalation {
        Escalation {
            reason: "attempts exhausted".to_string(),
            attempts: vec![
                AttemptRecord::new(1, FailureKind::Timeout, "timeout", 100),
                AttemptRecord::new(2, FailureKind::Validation, "scope violation", 40),
            ],
            states: vec!["PENDING".to_string(), "DELEGATING".to_string(), "ESCALATED".to_string()],
        }
    }

    #[test]
    fn test_outcome_accessors() {
        let ok: PhaseOutcome<u32> = PhaseOutcome::Success(7);
        assert!(ok.is_success());
        assert_eq!(ok.kind(), OutcomeKind::Success);
        assert_eq!(ok.success(), Some(&7));
        assert!(ok.failure_reason().is_none());
        assert!(ok.attempts().is_empty());

        let escalated: PhaseOutcome<u32> = PhaseOutcome::Escalated(escalation());
        assert_eq!(escalated.kind(), OutcomeKind::Escalated);
        assert_eq!(escalated.failure_reason(), Some("attempts exhausted"));
        assert_eq!(escalated.attempts().len(), 2);
        assert_eq!(escalated.failure_states().last().map(String::as_str), Some("ESCALATED"));
        assert!(ok.failure_states().is_empty());
        assert!(escalated.into_success().is_none());
    }

    #[test]
    fn test_escalation_summary_lists_history() {
        let e = escalation();
        assert_eq!(e.failure_reasons(), vec!["timeout", "scope violation"]);
        let summary = e.summary();
        assert!(summary.contains("attempt 1 (timeout): timeout"));
        assert!(summary.contains("attempt 2 (validation): scope violation"));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome: PhaseOutcome<u32> = PhaseOutcome::TimedOut(PhaseFailure {
            failure_reason: "timeout".to_string(),
            validation: None,
            attempts: Vec::new(),
            states: Vec::new(),
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "timed_out");
        assert_eq!(json["detail"]["failure_reason"], "timeout");
    }

    #[test]
    fn test_failure_kind_from_delegation_kind() {
        assert_eq!(FailureKind::from(DelegationErrorKind::Timeout), FailureKind::Timeout);
        assert_eq!(
            FailureKind::from(DelegationErrorKind::Retryable),
            FailureKind::RetryableFault
        );
        assert_eq!(FailureKind::from(DelegationErrorKind::Fatal), FailureKind::FatalFault);
    }
}
