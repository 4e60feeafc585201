//! The value every validator returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of a single validator run.
///
/// Built fresh by each validator; `BTreeMap`s keep output ordering stable so
/// identical inputs produce identical values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub checks: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ValidationResult {
    /// Start a result that passes until a check fails.
    pub fn new() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn record_check(&mut self, name: &str, passed: bool) {
        self.checks.insert(name.to_string(), passed);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn set_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    /// Mark the result failed. The first reason recorded wins.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.passed = false;
        if self.failure_reason.is_none() {
            self.failure_reason = Some(reason.into());
        }
    }

    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.get(name).copied()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_result_passes() {
        let result = ValidationResult::new();
        assert!(result.passed);
        assert!(result.failure_reason.is_none());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_first_failure_reason_wins() {
        let mut result = ValidationResult::new();
        result.fail("first");
        result.fail("second");
        assert!(!result.passed);
        assert_eq!(result.failure_reason.as_deref(), Some("first"));
    }

    #[test]
    fn test_checks_and_metrics_lookup() {
        let mut result = ValidationResult::new();
        result.record_check("scope", true);
        result.set_metric("total_lines_added", 12.0);
        assert_eq!(result.check("scope"), Some(true));
        assert_eq!(result.check("size"), None);
        assert_eq!(result.metric("total_lines_added"), Some(12.0));
    }
}
