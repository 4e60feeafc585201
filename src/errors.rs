//! Typed error hierarchy for the TDD orchestration engine.
//!
//! Two enums cover the only place where faults exist:
//! - `WorkerError`: raised by the injected specialist-worker binding
//! - `DelegationError`: the Gateway's classification of a failed call
//!
//! Validators and phase delegators never return errors; they return values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Faults raised by a specialist-worker binding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Transient worker fault: {0}")]
    Transient(String),

    #[error("Specialist worker unreachable: {0}")]
    Unreachable(String),

    #[error("Specialist worker rejected the task: {0}")]
    Rejected(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Malformed task: {0}")]
    MalformedTask(String),
}

impl WorkerError {
    /// Communication hiccups are worth another attempt; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Classification of a failed delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationErrorKind {
    Timeout,
    Retryable,
    Fatal,
}

impl std::fmt::Display for DelegationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Retryable => write!(f, "retryable"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Classified error returned by the delegation gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DelegationError {
    #[error("Delegation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Retryable delegation fault: {0}")]
    Retryable(String),

    #[error("Fatal delegation fault: {0}")]
    Fatal(String),
}

impl DelegationError {
    pub fn kind(&self) -> DelegationErrorKind {
        match self {
            Self::Timeout { .. } => DelegationErrorKind::Timeout,
            Self::Retryable(_) => DelegationErrorKind::Retryable,
            Self::Fatal(_) => DelegationErrorKind::Fatal,
        }
    }

    /// Whether a phase with a retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

impl From<WorkerError> for DelegationError {
    fn from(err: WorkerError) -> Self {
        if err.is_transient() {
            Self::Retryable(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}
