//! Green phase: get a specialist to make the failing test pass.
//!
//! The delegator runs an explicit retry loop over a [`RetryContext`]:
//!
//! 1. Build a [`DelegationRequest`] from the [`FixTask`] (plus retry feedback)
//! 2. Call the gateway
//! 3. Map the payload, then run the code change validator and the coverage
//!    validator, in that order
//! 4. On failure, retry with the failure reason while attempts remain,
//!    otherwise escalate with the full attempt history
//!
//! Fatal gateway faults escalate immediately. Changes from a failed attempt
//! are discarded; the next attempt starts from the pre-fix code.

use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::delegation::{DelegationGateway, DelegationRequest, DelegationResult};
use crate::errors::DelegationErrorKind;
use crate::tdd::outcome::{AttemptRecord, Escalation, FailureKind, PhaseOutcome};
use crate::tdd::prompts::build_green_prompt;
use crate::tdd::state::{GreenState, StateTrail};
use crate::tdd::types::{CodeChange, FixTask, RetryContext, TddState, TestChange};
use crate::tdd_config::TddToml;
use crate::validation::{
    CodeChangeValidator, CoverageThresholds, ValidationResult, validate_test_coverage,
};

pub const DEFAULT_GREEN_SPECIALIST: &str = "tdd-green-implementer";
pub const DEFAULT_DELEGATION_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Worker response fields as the green phase names them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GreenWorkerResponse {
    #[serde(default, alias = "code_changes", alias = "changes", alias = "filesChanged")]
    code_changes: Vec<CodeChange>,
    #[serde(default, alias = "test_changes", alias = "tests")]
    test_changes: Vec<TestChange>,
    #[serde(default, alias = "tests_pass", alias = "testsPassing", alias = "tests_passing")]
    tests_pass: bool,
    #[serde(default, alias = "test_results")]
    test_results: Value,
    #[serde(default, alias = "message")]
    error: Option<String>,
}

impl GreenWorkerResponse {
    fn from_payload(payload: &Value) -> Result<Self, String> {
        if !payload.is_object() {
            return Err("worker response did not contain a JSON object".to_string());
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| format!("worker response could not be mapped: {}", e))
    }
}

/// Outcome of the fix as confirmed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixValidation {
    pub tests_passing: bool,
    pub test_results: Value,
}

/// Normalized result of a successful green phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreenResult {
    pub code_changes: Vec<CodeChange>,
    pub test_changes: Vec<TestChange>,
    pub fix_validation: FixValidation,
    /// Wall time from phase entry to success, in milliseconds.
    pub implementation_time: u64,
    pub attempts: u32,
    pub code_validation: ValidationResult,
    pub coverage_validation: ValidationResult,
    /// States visited on the way to success, retries included.
    #[serde(default)]
    pub states: Vec<String>,
}

/// Drives the green phase state machine.
#[derive(Clone)]
pub struct GreenPhaseDelegator {
    gateway: DelegationGateway,
    code_validator: CodeChangeValidator,
    coverage_thresholds: CoverageThresholds,
    timeout_ms: u64,
    default_specialist: String,
}

impl GreenPhaseDelegator {
    pub fn new(gateway: DelegationGateway) -> Self {
        Self {
            gateway,
            code_validator: CodeChangeValidator::default(),
            coverage_thresholds: CoverageThresholds::default(),
            timeout_ms: DEFAULT_DELEGATION_TIMEOUT_MS,
            default_specialist: DEFAULT_GREEN_SPECIALIST.to_string(),
        }
    }

    /// Build a delegator whose limits, thresholds, and timeout come from configuration.
    pub fn from_config(gateway: DelegationGateway, config: &TddToml) -> Result<Self> {
        Ok(Self::new(gateway)
            .with_code_validator(config.code_change_validator()?)
            .with_coverage_thresholds(config.coverage_thresholds())
            .with_timeout_ms(config.delegation_timeout_ms())
            .with_default_specialist(&config.green.specialist))
    }

    pub fn with_code_validator(mut self, validator: CodeChangeValidator) -> Self {
        self.code_validator = validator;
        self
    }

    pub fn with_coverage_thresholds(mut self, thresholds: CoverageThresholds) -> Self {
        self.coverage_thresholds = thresholds;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_default_specialist(mut self, specialist: &str) -> Self {
        self.default_specialist = specialist.to_string();
        self
    }

    /// Run the green phase for one task.
    ///
    /// `max_retries` is the total number of delegation attempts (at least
    /// one). The result is always a [`PhaseOutcome`]; this never fails.
    #[tracing::instrument(
        name = "green_phase",
        skip(self, fix_task, tdd_state, session_id),
        fields(session_id = %session_id, failing_test = %fix_task.failing_test_ref)
    )]
    pub async fn delegate_green_phase(
        &self,
        fix_task: &FixTask,
        tdd_state: &TddState,
        session_id: &str,
        max_retries: u32,
    ) -> PhaseOutcome<GreenResult> {
        let max_attempts = max_retries.max(1);
        let allowed_paths = allowed_paths(fix_task, tdd_state);
        let started = Instant::now();
        let mut trail = StateTrail::<GreenState>::default();
        let mut retry: Option<RetryContext> = None;
        let mut history: Vec<AttemptRecord> = Vec::new();

        loop {
            let attempt = retry.as_ref().map_or(1, |ctx| ctx.attempt_number);
            let attempt_start = Instant::now();
            trail.transition(GreenState::Delegating);
            info!(attempt, max_attempts, "Delegating green phase");

            let request =
                self.build_request(fix_task, tdd_state, session_id, &allowed_paths, retry.as_ref());
            let (kind, reason) = match self.gateway.delegate(request).await {
                Ok(delegated) => {
                    trail.transition(GreenState::Validating);
                    match self.validate_attempt(&delegated, &allowed_paths, tdd_state) {
                        Ok((response, code_validation, coverage_validation)) => {
                            trail.transition(GreenState::Success);
                            info!(attempt, "Green phase succeeded");
                            return PhaseOutcome::Success(GreenResult {
                                code_changes: response.code_changes,
                                test_changes: response.test_changes,
                                fix_validation: FixValidation {
                                    tests_passing: true,
                                    test_results: response.test_results,
                                },
                                implementation_time: started.elapsed().as_millis() as u64,
                                attempts: attempt,
                                code_validation,
                                coverage_validation,
                                states: trail.names(),
                            });
                        }
                        Err(reason) => (FailureKind::Validation, reason),
                    }
                }
                Err(err) => {
                    let reason = match err.kind() {
                        DelegationErrorKind::Timeout => "timeout".to_string(),
                        _ => err.to_string(),
                    };
                    (FailureKind::from(err.kind()), reason)
                }
            };

            history.push(AttemptRecord::new(
                attempt,
                kind,
                &reason,
                attempt_start.elapsed().as_millis() as u64,
            ));
            warn!(attempt, kind = %kind, reason = %reason, "Green phase attempt failed");

            if kind == FailureKind::FatalFault {
                trail.transition(GreenState::Escalated);
                return PhaseOutcome::Escalated(Escalation {
                    reason,
                    attempts: history,
                    states: trail.names(),
                });
            }

            if attempt >= max_attempts {
                trail.transition(GreenState::Escalated);
                warn!(attempts = attempt, "Green phase escalated after exhausting attempts");
                return PhaseOutcome::Escalated(Escalation {
                    reason: format!(
                        "green phase failed after {} attempt(s); last failure: {}",
                        attempt, reason
                    ),
                    attempts: history,
                    states: trail.names(),
                });
            }

            trail.transition(GreenState::Retrying);
            retry = Some(match retry {
                None => RetryContext::after_first_failure(&reason),
                Some(ctx) => ctx.next(&reason),
            });
        }
    }

    fn build_request(
        &self,
        fix_task: &FixTask,
        tdd_state: &TddState,
        session_id: &str,
        allowed_paths: &[String],
        retry: Option<&RetryContext>,
    ) -> DelegationRequest {
        let specialist = if fix_task.specialist_id.trim().is_empty() {
            self.default_specialist.as_str()
        } else {
            fix_task.specialist_id.as_str()
        };
        let prompt = build_green_prompt(fix_task, tdd_state, session_id, allowed_paths, retry);
        DelegationRequest::new(specialist, &fix_task.description, &prompt, self.timeout_ms)
    }

    /// Map and validate one delegation. Errors are failure reasons.
    fn validate_attempt(
        &self,
        delegated: &DelegationResult,
        allowed_paths: &[String],
        tdd_state: &TddState,
    ) -> Result<(GreenWorkerResponse, ValidationResult, ValidationResult), String> {
        if !delegated.success {
            let detail = delegated
                .raw_payload
                .get("error")
                .or_else(|| delegated.raw_payload.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| delegated.raw_payload.as_str().map(str::to_string))
                .unwrap_or_else(|| "no detail given".to_string());
            return Err(format!("worker reported failure: {}", detail));
        }

        let response = GreenWorkerResponse::from_payload(&delegated.raw_payload)?;

        let code_validation = self
            .code_validator
            .validate(&response.code_changes, allowed_paths);
        if !code_validation.passed {
            return Err(code_validation
                .failure_reason
                .unwrap_or_else(|| "code change validation failed".to_string()));
        }

        let coverage_validation = validate_test_coverage(
            &response.test_changes,
            &tdd_state.coverage_baseline,
            &self.coverage_thresholds,
        );
        if !coverage_validation.passed {
            return Err(coverage_validation
                .failure_reason
                .unwrap_or_else(|| "test coverage validation failed".to_string()));
        }

        if !response.tests_pass {
            let detail = response
                .error
                .as_deref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default();
            return Err(format!("worker reported failing tests{}", detail));
        }

        Ok((response, code_validation, coverage_validation))
    }
}

/// The task's affected files widened by the session's allowed paths.
pub fn allowed_paths(fix_task: &FixTask, tdd_state: &TddState) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for path in fix_task.affected_files.iter().chain(&tdd_state.allowed_paths) {
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    paths
}
