//! Data model shared by the green and refactor phases.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A bug to fix, produced upstream by fix-strategy selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixTask {
    pub specialist_id: String,
    pub description: String,
    pub failing_test_ref: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

impl FixTask {
    pub fn new(specialist_id: &str, description: &str, failing_test_ref: &str) -> Self {
        Self {
            specialist_id: specialist_id.to_string(),
            description: description.to_string(),
            failing_test_ref: failing_test_ref.to_string(),
            root_cause: String::new(),
            strategy: String::new(),
            affected_files: Vec::new(),
        }
    }

    pub fn with_root_cause(mut self, root_cause: &str) -> Self {
        self.root_cause = root_cause.to_string();
        self
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = strategy.to_string();
        self
    }

    pub fn with_affected_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.affected_files = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Feedback threaded into the next delegation after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryContext {
    /// Number of the attempt about to run (2 for the first retry).
    pub attempt_number: u32,
    pub previous_failure_reason: String,
    /// Every failure reason so far, oldest first.
    pub failure_history: Vec<String>,
}

impl RetryContext {
    /// Context created by the first failure.
    pub fn after_first_failure(reason: &str) -> Self {
        Self {
            attempt_number: 2,
            previous_failure_reason: reason.to_string(),
            failure_history: vec![reason.to_string()],
        }
    }

    /// Context for the attempt after this one.
    pub fn next(&self, reason: &str) -> Self {
        let mut failure_history = self.failure_history.clone();
        failure_history.push(reason.to_string());
        Self {
            attempt_number: self.attempt_number + 1,
            previous_failure_reason: reason.to_string(),
            failure_history,
        }
    }
}

/// Kind of file change reported by a worker.
///
/// Unknown strings deserialize into `Unrecognized` so validation can report
/// them instead of rejecting the whole response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Unrecognized(String),
}

impl ChangeType {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl FromStr for ChangeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "added" | "add" | "created" | "new" => Self::Added,
            "modified" | "modify" | "changed" | "updated" => Self::Modified,
            "deleted" | "delete" | "removed" => Self::Deleted,
            _ => Self::Unrecognized(s.to_string()),
        })
    }
}

impl From<String> for ChangeType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(change_type) => change_type,
            Err(never) => match never {},
        }
    }
}

impl From<ChangeType> for String {
    fn from(change_type: ChangeType) -> Self {
        change_type.as_str().to_string()
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proposed file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    #[serde(alias = "file")]
    pub path: String,
    #[serde(alias = "change_type", alias = "type")]
    pub change_type: ChangeType,
    #[serde(default, alias = "lines_added")]
    pub lines_added: u32,
    #[serde(default, alias = "lines_removed")]
    pub lines_removed: u32,
}

impl CodeChange {
    pub fn new(path: &str, change_type: ChangeType, lines_added: u32, lines_removed: u32) -> Self {
        Self {
            path: path.to_string(),
            change_type,
            lines_added,
            lines_removed,
        }
    }

    pub fn modified(path: &str, lines_added: u32, lines_removed: u32) -> Self {
        Self::new(path, ChangeType::Modified, lines_added, lines_removed)
    }

    pub fn added(path: &str, lines_added: u32) -> Self {
        Self::new(path, ChangeType::Added, lines_added, 0)
    }

    pub fn total_lines(&self) -> u64 {
        u64::from(self.lines_added) + u64::from(self.lines_removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Unit,
    Integration,
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Integration => write!(f, "integration"),
        }
    }
}

/// Coverage percentages (0-100).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageMetrics {
    #[serde(alias = "line_coverage", alias = "lines")]
    pub line_coverage: f64,
    #[serde(default, alias = "branch_coverage", alias = "branches")]
    pub branch_coverage: f64,
}

impl CoverageMetrics {
    pub fn new(line_coverage: f64, branch_coverage: f64) -> Self {
        Self {
            line_coverage,
            branch_coverage,
        }
    }
}

/// A test file added or changed alongside the fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestChange {
    #[serde(alias = "file")]
    pub path: String,
    pub framework: String,
    pub coverage: CoverageMetrics,
    #[serde(alias = "test_type", alias = "type")]
    pub test_type: TestType,
}

impl TestChange {
    pub fn new(path: &str, framework: &str, test_type: TestType, coverage: CoverageMetrics) -> Self {
        Self {
            path: path.to_string(),
            framework: framework.to_string(),
            coverage,
            test_type,
        }
    }

    pub fn unit(path: &str, framework: &str, line: f64, branch: f64) -> Self {
        Self::new(path, framework, TestType::Unit, CoverageMetrics::new(line, branch))
    }

    pub fn integration(path: &str, framework: &str, line: f64, branch: f64) -> Self {
        Self::new(
            path,
            framework,
            TestType::Integration,
            CoverageMetrics::new(line, branch),
        )
    }
}

/// Coverage measured before the fix.
pub type CoverageBaseline = CoverageMetrics;

/// Named categories of quality issue checked during refactor validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CodeSmell {
    LongMethod,
    Duplication,
    ComplexConditional,
    Other(String),
}

impl CodeSmell {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LongMethod => "long-method",
            Self::Duplication => "duplication",
            Self::ComplexConditional => "complex-conditional",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for CodeSmell {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "long-method" => Self::LongMethod,
            "duplication" | "duplicate-code" => Self::Duplication,
            "complex-conditional" => Self::ComplexConditional,
            _ => Self::Other(s),
        }
    }
}

impl From<CodeSmell> for String {
    fn from(smell: CodeSmell) -> Self {
        smell.as_str().to_string()
    }
}

impl std::fmt::Display for CodeSmell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality targets handed to the refactor specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTargets {
    pub max_cyclomatic_complexity: u32,
    pub max_method_length: u32,
    pub code_smells: Vec<CodeSmell>,
}

impl Default for QualityTargets {
    fn default() -> Self {
        Self {
            max_cyclomatic_complexity: 10,
            max_method_length: 50,
            code_smells: vec![
                CodeSmell::LongMethod,
                CodeSmell::Duplication,
                CodeSmell::ComplexConditional,
            ],
        }
    }
}

/// Step of the red/green/refactor cycle a session is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TddPhase {
    #[default]
    Red,
    Green,
    Refactor,
}

/// Read-only session context supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TddState {
    #[serde(default)]
    pub phase: TddPhase,
    #[serde(default)]
    pub coverage_baseline: CoverageBaseline,
    /// Paths beyond the task's affected files that changes may touch.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Complexity measured before the fix, when the session has it.
    #[serde(default)]
    pub complexity_baseline: Option<f64>,
}

impl TddState {
    pub fn new(coverage_baseline: CoverageBaseline) -> Self {
        Self {
            coverage_baseline,
            ..Self::default()
        }
    }

    pub fn with_allowed_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_complexity_baseline(mut self, complexity: f64) -> Self {
        self.complexity_baseline = Some(complexity);
        self
    }

    pub fn with_phase(mut self, phase: TddPhase) -> Self {
        self.phase = phase;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_parse_aliases() {
        assert_eq!("ADDED".parse::<ChangeType>().unwrap(), ChangeType::Added);
        assert_eq!("updated".parse::<ChangeType>().unwrap(), ChangeType::Modified);
        assert_eq!("removed".parse::<ChangeType>().unwrap(), ChangeType::Deleted);
        assert_eq!(
            "renamed".parse::<ChangeType>().unwrap(),
            ChangeType::Unrecognized("renamed".to_string())
        );
    }

    #[test]
    fn test_code_change_deserializes_unknown_type() {
        let change: CodeChange = serde_json::from_str(
            r#"{"path": "src/a.rs", "changeType": "moved", "linesAdded": 1}"#,
        )
        .unwrap();
        assert!(!change.change_type.is_recognized());
        assert_eq!(change.lines_removed, 0);
    }

    #[test]
    fn test_code_change_snake_case_aliases() {
        let change: CodeChange = serde_json::from_str(
            r#"{"file": "src/a.rs", "change_type": "modified", "lines_added": 4, "lines_removed": 2}"#,
        )
        .unwrap();
        assert_eq!(change, CodeChange::modified("src/a.rs", 4, 2));
        assert_eq!(change.total_lines(), 6);
    }

    #[test]
    fn test_test_change_deserialize() {
        let change: TestChange = serde_json::from_str(
            r#"{"path": "tests/login.test.ts", "framework": "jest",
                "coverage": {"lineCoverage": 91.5, "branchCoverage": 80},
                "testType": "unit"}"#,
        )
        .unwrap();
        assert_eq!(change.test_type, TestType::Unit);
        assert_eq!(change.coverage.line_coverage, 91.5);
    }

    #[test]
    fn test_retry_context_accumulates_history() {
        let ctx = RetryContext::after_first_failure("timeout");
        assert_eq!(ctx.attempt_number, 2);

        let ctx = ctx.next("scope violation");
        assert_eq!(ctx.attempt_number, 3);
        assert_eq!(ctx.previous_failure_reason, "scope violation");
        assert_eq!(ctx.failure_history, vec!["timeout", "scope violation"]);
    }

    #[test]
    fn test_quality_targets_default() {
        let targets = QualityTargets::default();
        assert_eq!(targets.max_cyclomatic_complexity, 10);
        assert_eq!(targets.max_method_length, 50);
        assert_eq!(targets.code_smells.len(), 3);
    }

    #[test]
    fn test_code_smell_round_trip_names() {
        assert_eq!(CodeSmell::from("Long_Method".to_string()), CodeSmell::LongMethod);
        assert_eq!(String::from(CodeSmell::ComplexConditional), "complex-conditional");
        assert_eq!(
            CodeSmell::from("god-object".to_string()),
            CodeSmell::Other("god-object".to_string())
        );
    }
}
