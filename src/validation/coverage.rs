//! Validation of test coverage against minimum thresholds and a baseline.

use serde::{Deserialize, Serialize};

use crate::tdd::types::{CoverageBaseline, TestChange, TestType};
use crate::validation::result::ValidationResult;

pub const DEFAULT_MIN_UNIT: f64 = 80.0;
pub const DEFAULT_MIN_INTEGRATION: f64 = 70.0;
pub const DEFAULT_MIN_BRANCH: f64 = 70.0;

/// Frameworks whose coverage numbers are trusted.
const RECOGNIZED_FRAMEWORKS: &[&str] = &[
    "jest",
    "vitest",
    "mocha",
    "jasmine",
    "ava",
    "pytest",
    "unittest",
    "nose",
    "junit",
    "testng",
    "kotest",
    "rspec",
    "minitest",
    "go-test",
    "cargo-test",
    "nextest",
    "xunit",
    "nunit",
    "mstest",
    "phpunit",
    "exunit",
];

/// Minimum coverage percentages and the regression policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageThresholds {
    pub min_unit: f64,
    pub min_integration: f64,
    pub min_branch: f64,
    pub allow_regression: bool,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            min_unit: DEFAULT_MIN_UNIT,
            min_integration: DEFAULT_MIN_INTEGRATION,
            min_branch: DEFAULT_MIN_BRANCH,
            allow_regression: false,
        }
    }
}

impl CoverageThresholds {
    pub fn with_allow_regression(mut self, allow: bool) -> Self {
        self.allow_regression = allow;
        self
    }
}

/// Check whether a framework name is one whose metrics we aggregate.
pub fn is_recognized_framework(framework: &str) -> bool {
    let normalized = framework.trim().to_lowercase().replace(['_', ' '], "-");
    let normalized = match normalized.as_str() {
        "go" | "gotest" => "go-test",
        "cargo" | "rust" => "cargo-test",
        "cargo-nextest" => "nextest",
        "junit4" | "junit5" | "jupiter" => "junit",
        other => other,
    };
    RECOGNIZED_FRAMEWORKS.contains(&normalized)
}

/// Coverage aggregated over recognized test changes.
#[derive(Debug, Clone, Default, PartialEq)]
struct CoverageAggregate {
    unit_line: Option<f64>,
    integration_line: Option<f64>,
    line: Option<f64>,
    branch: Option<f64>,
    unit_count: usize,
    integration_count: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

fn aggregate(recognized: &[&TestChange]) -> CoverageAggregate {
    let of_type = |t: TestType| {
        recognized
            .iter()
            .filter(move |c| c.test_type == t)
            .map(|c| c.coverage.line_coverage)
    };
    CoverageAggregate {
        unit_line: mean(of_type(TestType::Unit)),
        integration_line: mean(of_type(TestType::Integration)),
        line: mean(recognized.iter().map(|c| c.coverage.line_coverage)),
        branch: mean(recognized.iter().map(|c| c.coverage.branch_coverage)),
        unit_count: of_type(TestType::Unit).count(),
        integration_count: of_type(TestType::Integration).count(),
    }
}

/// Validate test changes.
///
/// Threshold violations are reported before regressions; a regression fails
/// the result even when every absolute threshold is met.
pub fn validate_test_coverage(
    test_changes: &[TestChange],
    baseline: &CoverageBaseline,
    thresholds: &CoverageThresholds,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    result.set_metric("test_changes", test_changes.len() as f64);

    result.record_check("has_tests", !test_changes.is_empty());
    if test_changes.is_empty() {
        result.fail("no test changes were provided; a fix must add or update tests");
        return result;
    }

    let (recognized, unsupported): (Vec<&TestChange>, Vec<&TestChange>) = test_changes
        .iter()
        .partition(|c| is_recognized_framework(&c.framework));
    for change in &unsupported {
        result.add_warning(format!(
            "unsupported test framework '{}' for {}; its coverage was ignored",
            change.framework, change.path
        ));
    }

    result.record_check("recognized_framework", !recognized.is_empty());
    if recognized.is_empty() {
        result.fail("no test changes from a recognized framework; coverage cannot be measured");
        return result;
    }

    let agg = aggregate(&recognized);
    result.set_metric("unit_tests", agg.unit_count as f64);
    result.set_metric("integration_tests", agg.integration_count as f64);
    if let Some(v) = agg.unit_line {
        result.set_metric("unit_line_coverage", v);
    }
    if let Some(v) = agg.integration_line {
        result.set_metric("integration_line_coverage", v);
    }
    let line = agg.line.unwrap_or(0.0);
    let branch = agg.branch.unwrap_or(0.0);
    result.set_metric("line_coverage", line);
    result.set_metric("branch_coverage", branch);
    // Unit coverage is what the baseline measures; integration numbers must
    // not mask a unit drop.
    let (compared_label, compared_line) = match agg.unit_line {
        Some(unit) => ("unit line coverage", unit),
        None => ("line coverage", line),
    };
    result.set_metric("line_coverage_delta", compared_line - baseline.line_coverage);
    result.set_metric("branch_coverage_delta", branch - baseline.branch_coverage);

    if let Some(unit) = agg.unit_line {
        let ok = unit >= thresholds.min_unit;
        result.record_check("min_unit_coverage", ok);
        if !ok {
            result.fail(format!(
                "unit test line coverage {:.1}% is below the required {:.1}%",
                unit, thresholds.min_unit
            ));
        }
    }

    if let Some(integration) = agg.integration_line {
        let ok = integration >= thresholds.min_integration;
        result.record_check("min_integration_coverage", ok);
        if !ok {
            result.fail(format!(
                "integration test line coverage {:.1}% is below the required {:.1}%",
                integration, thresholds.min_integration
            ));
        }
    }

    let branch_ok = branch >= thresholds.min_branch;
    result.record_check("min_branch_coverage", branch_ok);
    if !branch_ok {
        result.fail(format!(
            "branch coverage {:.1}% is below the required {:.1}%",
            branch, thresholds.min_branch
        ));
    }

    let line_regressed = compared_line < baseline.line_coverage;
    let branch_regressed = branch < baseline.branch_coverage;
    let no_regression = !line_regressed && !branch_regressed;
    result.record_check("no_regression", no_regression);
    if !no_regression {
        let mut details = Vec::new();
        if line_regressed {
            details.push(format!(
                "{} {:.1}% < baseline {:.1}% (delta {:.1})",
                compared_label,
                compared_line,
                baseline.line_coverage,
                compared_line - baseline.line_coverage
            ));
        }
        if branch_regressed {
            details.push(format!(
                "branch coverage {:.1}% < baseline {:.1}% (delta {:.1})",
                branch,
                baseline.branch_coverage,
                branch - baseline.branch_coverage
            ));
        }
        let message = format!("coverage regression: {}", details.join("; "));
        if thresholds.allow_regression {
            result.add_warning(message);
        } else {
            result.fail(message);
        }
    }

    result
}
