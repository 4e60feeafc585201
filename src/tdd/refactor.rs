//! Refactor phase: improve quality of an accepted green-phase fix.
//!
//! Entered only with a [`GreenResult`], which can only be obtained from a
//! successful green phase. There is no retry loop: a failed refactor is
//! reported and the green phase's code remains the accepted result.
//!
//! Success requires all three checks:
//! - `tests_still_pass`: the worker confirms the suite is still green
//! - `no_complexity_regression`: complexity after ≤ complexity before
//! - `no_new_code_smells`: no named smell gained instances

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::delegation::{DelegationGateway, DelegationRequest};
use crate::errors::DelegationErrorKind;
use crate::tdd::green::{DEFAULT_DELEGATION_TIMEOUT_MS, GreenResult};
use crate::tdd::outcome::{AttemptRecord, Escalation, FailureKind, PhaseFailure, PhaseOutcome};
use crate::tdd::prompts::build_refactor_prompt;
use crate::tdd::state::{RefactorState, StateTrail};
use crate::tdd::types::{CodeChange, CodeSmell, QualityTargets, TddState};
use crate::tdd_config::TddToml;
use crate::validation::ValidationResult;

pub const DEFAULT_REFACTOR_SPECIALIST: &str = "tdd-refactorer";

/// One detected instance of a code smell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SmellRepr")]
pub struct SmellInstance {
    pub kind: CodeSmell,
    pub location: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SmellRepr {
    Name(String),
    Detailed {
        #[serde(alias = "type", alias = "smell")]
        kind: String,
        #[serde(default)]
        location: Option<String>,
    },
}

impl From<SmellRepr> for SmellInstance {
    fn from(repr: SmellRepr) -> Self {
        match repr {
            SmellRepr::Name(name) => Self {
                kind: CodeSmell::from(name),
                location: None,
            },
            SmellRepr::Detailed { kind, location } => Self {
                kind: CodeSmell::from(kind),
                location,
            },
        }
    }
}

/// Quality measurements reported by the refactor worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    #[serde(default, alias = "complexity_before", alias = "beforeComplexity")]
    pub complexity_before: Option<f64>,
    #[serde(default, alias = "complexity_after", alias = "afterComplexity", alias = "complexity")]
    pub complexity_after: Option<f64>,
    #[serde(default, alias = "max_method_length")]
    pub max_method_length: Option<u32>,
    #[serde(default, alias = "code_smells_before", alias = "smellsBefore")]
    pub code_smells_before: Vec<SmellInstance>,
    #[serde(default, alias = "code_smells_after", alias = "smellsAfter")]
    pub code_smells_after: Vec<SmellInstance>,
}

/// Worker response fields as the refactor phase names them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefactorWorkerResponse {
    #[serde(default, alias = "refactored_changes", alias = "codeChanges", alias = "code_changes")]
    refactored_changes: Vec<CodeChange>,
    #[serde(default, alias = "tests_still_pass", alias = "testsPass", alias = "tests_pass")]
    tests_still_pass: bool,
    #[serde(default, alias = "quality_metrics", alias = "metrics")]
    quality_metrics: QualityMetrics,
    #[serde(default, alias = "message")]
    error: Option<String>,
}

/// Result of a successful refactor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorResult {
    pub code_changes: Vec<CodeChange>,
    pub quality_metrics: QualityMetrics,
    pub tests_still_pass: bool,
    pub refactor_time: u64,
    pub validation: ValidationResult,
    #[serde(default)]
    pub states: Vec<String>,
}

/// Drives the refactor phase state machine.
#[derive(Clone)]
pub struct RefactorPhaseCoordinator {
    gateway: DelegationGateway,
    timeout_ms: u64,
    specialist: String,
    default_targets: QualityTargets,
}

impl RefactorPhaseCoordinator {
    pub fn new(gateway: DelegationGateway) -> Self {
        Self {
            gateway,
            timeout_ms: DEFAULT_DELEGATION_TIMEOUT_MS,
            specialist: DEFAULT_REFACTOR_SPECIALIST.to_string(),
            default_targets: QualityTargets::default(),
        }
    }

    pub fn from_config(gateway: DelegationGateway, config: &TddToml) -> Result<Self> {
        Ok(Self::new(gateway)
            .with_timeout_ms(config.delegation_timeout_ms())
            .with_specialist(&config.refactor.specialist)
            .with_default_targets(config.quality_targets()))
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_specialist(mut self, specialist: &str) -> Self {
        self.specialist = specialist.to_string();
        self
    }

    pub fn with_default_targets(mut self, targets: QualityTargets) -> Self {
        self.default_targets = targets;
        self
    }

    /// Run the refactor phase once. Never retries.
    #[tracing::instrument(
        name = "refactor_phase",
        skip(self, green_result, tdd_state, session_id, quality_targets),
        fields(session_id = %session_id, files = green_result.code_changes.len())
    )]
    pub async fn coordinate_refactor_phase(
        &self,
        green_result: &GreenResult,
        tdd_state: &TddState,
        session_id: &str,
        quality_targets: Option<QualityTargets>,
    ) -> PhaseOutcome<RefactorResult> {
        let targets = quality_targets.unwrap_or_else(|| self.default_targets.clone());
        let started = Instant::now();
        let mut trail = StateTrail::<RefactorState>::default();

        trail.transition(RefactorState::Delegating);
        let prompt = build_refactor_prompt(&green_result.code_changes, &targets, session_id);
        let request = DelegationRequest::new(
            &self.specialist,
            "Refactor the accepted green-phase fix against quality targets",
            &prompt,
            self.timeout_ms,
        );

        let delegated = match self.gateway.delegate(request).await {
            Ok(delegated) => delegated,
            Err(err) => {
                trail.transition(RefactorState::Failed);
                let kind = FailureKind::from(err.kind());
                let reason = err.to_string();
                warn!(kind = %kind, reason = %reason, "Refactor delegation failed");
                let attempts = vec![AttemptRecord::new(
                    1,
                    kind,
                    &reason,
                    started.elapsed().as_millis() as u64,
                )];
                let states = trail.names();
                return match err.kind() {
                    DelegationErrorKind::Timeout => PhaseOutcome::TimedOut(PhaseFailure {
                        failure_reason: "timeout".to_string(),
                        validation: None,
                        attempts,
                        states,
                    }),
                    DelegationErrorKind::Fatal => PhaseOutcome::Escalated(Escalation {
                        reason,
                        attempts,
                        states,
                    }),
                    DelegationErrorKind::Retryable => PhaseOutcome::ValidationFailed(PhaseFailure {
                        failure_reason: reason,
                        validation: None,
                        attempts,
                        states,
                    }),
                };
            }
        };

        trail.transition(RefactorState::Validating);
        let response = if delegated.success {
            map_response(&delegated.raw_payload)
        } else {
            Err(format!(
                "worker reported failure: {}",
                describe_payload(&delegated.raw_payload)
            ))
        };
        let response = match response {
            Ok(response) => response,
            Err(reason) => {
                trail.transition(RefactorState::Failed);
                warn!(reason = %reason, "Refactor response rejected");
                return PhaseOutcome::ValidationFailed(PhaseFailure {
                    attempts: vec![AttemptRecord::new(
                        1,
                        FailureKind::Validation,
                        &reason,
                        started.elapsed().as_millis() as u64,
                    )],
                    failure_reason: reason,
                    validation: None,
                    states: trail.names(),
                });
            }
        };

        let validation = validate_refactor(&response, &targets, tdd_state);
        if !validation.passed {
            trail.transition(RefactorState::Failed);
            let reason = validation
                .failure_reason
                .clone()
                .unwrap_or_else(|| "refactor validation failed".to_string());
            warn!(reason = %reason, "Refactor validation failed; keeping green-phase changes");
            return PhaseOutcome::ValidationFailed(PhaseFailure {
                attempts: vec![AttemptRecord::new(
                    1,
                    FailureKind::Validation,
                    &reason,
                    started.elapsed().as_millis() as u64,
                )],
                failure_reason: reason,
                validation: Some(validation),
                states: trail.names(),
            });
        }

        trail.transition(RefactorState::Success);
        info!("Refactor phase succeeded");
        PhaseOutcome::Success(RefactorResult {
            code_changes: response.refactored_changes,
            quality_metrics: response.quality_metrics,
            tests_still_pass: true,
            refactor_time: started.elapsed().as_millis() as u64,
            validation,
            states: trail.names(),
        })
    }
}

/// Code that stands after the refactor phase: the refactored changes on
/// success, the green phase's changes otherwise.
pub fn accepted_code_changes<'a>(
    green_result: &'a GreenResult,
    refactor: &'a PhaseOutcome<RefactorResult>,
) -> &'a [CodeChange] {
    match refactor.success() {
        Some(result) if !result.code_changes.is_empty() => &result.code_changes,
        _ => &green_result.code_changes,
    }
}

fn map_response(payload: &Value) -> Result<RefactorWorkerResponse, String> {
    if !payload.is_object() {
        return Err("worker response did not contain a JSON object".to_string());
    }
    serde_json::from_value(payload.clone())
        .map_err(|e| format!("worker response could not be mapped: {}", e))
}

fn describe_payload(payload: &Value) -> String {
    payload
        .get("error")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .or_else(|| payload.as_str())
        .unwrap_or("no detail given")
        .to_string()
}

fn smell_counts(instances: &[SmellInstance]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for instance in instances {
        *counts.entry(instance.kind.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Validate a mapped refactor response. All three checks are mandatory.
fn validate_refactor(
    response: &RefactorWorkerResponse,
    targets: &QualityTargets,
    tdd_state: &TddState,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    let metrics = &response.quality_metrics;

    result.record_check("tests_still_pass", response.tests_still_pass);
    if !response.tests_still_pass {
        let detail = response
            .error
            .as_deref()
            .map(|e| format!(": {}", e))
            .unwrap_or_default();
        result.fail(format!("tests_still_pass: tests no longer pass after refactoring{}", detail));
    }

    let prior = tdd_state.complexity_baseline.or(metrics.complexity_before);
    let complexity_ok = match (prior, metrics.complexity_after) {
        (Some(before), Some(after)) => {
            result.set_metric("complexity_before", before);
            result.set_metric("complexity_after", after);
            result.set_metric("complexity_delta", after - before);
            if after > before {
                result.fail(format!(
                    "no_complexity_regression: complexity increased from {} to {}",
                    before, after
                ));
                false
            } else {
                if after > f64::from(targets.max_cyclomatic_complexity) {
                    result.add_warning(format!(
                        "complexity {} is still above the target of {}",
                        after, targets.max_cyclomatic_complexity
                    ));
                }
                true
            }
        }
        (None, _) => {
            result.fail("no_complexity_regression: no prior complexity measurement available");
            false
        }
        (_, None) => {
            result.fail("no_complexity_regression: worker did not report complexity after refactoring");
            false
        }
    };
    result.record_check("no_complexity_regression", complexity_ok);

    let before = smell_counts(&metrics.code_smells_before);
    let after = smell_counts(&metrics.code_smells_after);
    let introduced: Vec<String> = targets
        .code_smells
        .iter()
        .filter_map(|smell| {
            let name = smell.to_string();
            let was = before.get(&name).copied().unwrap_or(0);
            let now = after.get(&name).copied().unwrap_or(0);
            (now > was).then(|| format!("{} (+{})", name, now - was))
        })
        .collect();
    result.record_check("no_new_code_smells", introduced.is_empty());
    if !introduced.is_empty() {
        result.fail(format!(
            "no_new_code_smells: refactor introduced {}",
            introduced.join(", ")
        ));
    }
    result.set_metric("code_smells_before", metrics.code_smells_before.len() as f64);
    result.set_metric("code_smells_after", metrics.code_smells_after.len() as f64);

    if let Some(length) = metrics.max_method_length {
        result.set_metric("max_method_length", f64::from(length));
        if length > targets.max_method_length {
            result.add_warning(format!(
                "longest method is {} lines, above the target of {}",
                length, targets.max_method_length
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tdd::green::FixValidation;

    fn response(value: Value) -> RefactorWorkerResponse {
        map_response(&value).unwrap()
    }

    fn green_result() -> GreenResult {
        GreenResult {
            code_changes: vec![CodeChange::modified("src/auth/token.ts", 8, 2)],
            test_changes: Vec::new(),
            fix_validation: FixValidation {
                tests_passing: true,
                test_results: Value::Null,
            },
            implementation_time: 10,
            attempts: 1,
            code_validation: ValidationResult::new(),
            coverage_validation: ValidationResult::new(),
            states: Vec::new(),
        }
    }

    #[test]
    fn test_all_checks_pass() {
        let r = response(serde_json::json!({
            "testsStillPass": true,
            "qualityMetrics": {"complexityBefore": 12, "complexityAfter": 8,
                               "codeSmellsBefore": ["long-method"], "codeSmellsAfter": []}
        }));
        let result = validate_refactor(&r, &QualityTargets::default(), &TddState::default());

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metric("complexity_delta"), Some(-4.0));
        assert_eq!(result.check("no_new_code_smells"), Some(true));
    }

    #[test]
    fn test_complexity_regression_under_ceiling_fails() {
        let r = response(serde_json::json!({
            "testsStillPass": true,
            "qualityMetrics": {"complexityBefore": 4, "complexityAfter": 6}
        }));
        let result = validate_refactor(&r, &QualityTargets::default(), &TddState::default());

        assert!(!result.passed);
        assert!(result
            .failure_reason
            .unwrap()
            .starts_with("no_complexity_regression"));
    }

    #[test]
    fn test_session_baseline_wins_over_reported_before() {
        let r = response(serde_json::json!({
            "testsStillPass": true,
            "qualityMetrics": {"complexityBefore": 20, "complexityAfter": 9}
        }));
        let state = TddState::default().with_complexity_baseline(7.0);
        let result = validate_refactor(&r, &QualityTargets::default(), &state);
        assert!(!result.passed);
        assert_eq!(result.metric("complexity_before"), Some(7.0));
    }

    #[test]
    fn test_missing_complexity_fails() {
        let r = response(serde_json::json!({"testsStillPass": true}));
        let result = validate_refactor(&r, &QualityTargets::default(), &TddState::default());
        assert!(!result.passed);
        assert_eq!(result.check("no_complexity_regression"), Some(false));
    }

    #[test]
    fn test_new_named_smell_fails() {
        let r = response(serde_json::json!({
            "testsStillPass": true,
            "qualityMetrics": {
                "complexityBefore": 5, "complexityAfter": 5,
                "codeSmellsBefore": [{"kind": "duplication", "location": "a.ts:1"}],
                "codeSmellsAfter": [
                    {"kind": "duplication", "location": "a.ts:1"},
                    {"type": "duplication", "location": "b.ts:9"},
                    "god-object"
                ]
            }
        }));
        let result = validate_refactor(&r, &QualityTargets::default(), &TddState::default());

        assert!(!result.passed);
        let reason = result.failure_reason.unwrap();
        assert!(reason.contains("duplication (+1)"));
        assert!(!reason.contains("god-object"));
    }

    #[test]
    fn test_tests_failing_named_first() {
        let r = response(serde_json::json!({
            "testsStillPass": false,
            "qualityMetrics": {"complexityBefore": 5, "complexityAfter": 9}
        }));
        let result = validate_refactor(&r, &QualityTargets::default(), &TddState::default());
        assert!(result.failure_reason.as_deref().unwrap().starts_with("tests_still_pass"));
        assert_eq!(result.check("no_complexity_regression"), Some(false));
    }

    #[test]
    fn test_target_overruns_are_warnings() {
        let r = response(serde_json::json!({
            "tests_still_pass": true,
            "metrics": {"complexity_before": 30, "complexity_after": 14, "max_method_length": 80}
        }));
        let result = validate_refactor(&r, &QualityTargets::default(), &TddState::default());
        assert!(result.passed);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_accepted_changes_fall_back_to_green() {
        let green = green_result();
        let failed: PhaseOutcome<RefactorResult> = PhaseOutcome::ValidationFailed(PhaseFailure {
            failure_reason: "tests_still_pass".to_string(),
            validation: None,
            attempts: Vec::new(),
            states: Vec::new(),
        });
        assert_eq!(accepted_code_changes(&green, &failed), green.code_changes.as_slice());

        let refactored = PhaseOutcome::Success(RefactorResult {
            code_changes: vec![CodeChange::modified("src/auth/token.ts", 3, 9)],
            quality_metrics: QualityMetrics::default(),
            tests_still_pass: true,
            refactor_time: 5,
            validation: ValidationResult::new(),
            states: Vec::new(),
        });
        assert_eq!(accepted_code_changes(&green, &refactored)[0].lines_removed, 9);
    }
}
