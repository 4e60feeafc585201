//! Configuration for the TDD engine, read from `tdd.toml`.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! [delegation]
//! timeout_ms = 300000
//!
//! [green]
//! max_retries = 2
//! specialist = "tdd-green-implementer"
//!
//! [code_changes]
//! per_file_limit = 500
//! total_limit = 2000
//! soft_margin = 0.8
//! extra_exclusions = ["generated/**"]
//!
//! [coverage]
//! min_unit = 80.0
//! min_integration = 70.0
//! min_branch = 70.0
//! allow_regression = false
//!
//! [refactor]
//! specialist = "tdd-refactorer"
//! max_cyclomatic_complexity = 10
//! max_method_length = 50
//! code_smells = ["long-method", "duplication", "complex-conditional"]
//! ```
//!
//! Environment variables override the file:
//! `TDD_DELEGATION_TIMEOUT_MS`, `TDD_MAX_RETRIES`, `TDD_ALLOW_COVERAGE_REGRESSION`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::tdd::green::{DEFAULT_DELEGATION_TIMEOUT_MS, DEFAULT_GREEN_SPECIALIST, DEFAULT_MAX_RETRIES};
use crate::tdd::refactor::DEFAULT_REFACTOR_SPECIALIST;
use crate::tdd::types::{CodeSmell, QualityTargets};
use crate::validation::code_changes::{DEFAULT_PER_FILE_LIMIT, DEFAULT_SOFT_MARGIN, DEFAULT_TOTAL_LIMIT};
use crate::validation::coverage::{DEFAULT_MIN_BRANCH, DEFAULT_MIN_INTEGRATION, DEFAULT_MIN_UNIT};
use crate::validation::{CodeChangeLimits, CodeChangeValidator, CoverageThresholds, ExclusionPolicy};

pub const CONFIG_FILE_NAME: &str = "tdd.toml";

const ENV_TIMEOUT_MS: &str = "TDD_DELEGATION_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "TDD_MAX_RETRIES";
const ENV_ALLOW_REGRESSION: &str = "TDD_ALLOW_COVERAGE_REGRESSION";

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DelegationSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_DELEGATION_TIMEOUT_MS
}

/// Green phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreenSection {
    /// Total delegation attempts per green phase
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Used when a fix task names no specialist
    #[serde(default = "default_green_specialist")]
    pub specialist: String,
}

impl Default for GreenSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            specialist: default_green_specialist(),
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_green_specialist() -> String {
    DEFAULT_GREEN_SPECIALIST.to_string()
}

/// Code change validator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChangesSection {
    #[serde(default = "default_per_file_limit")]
    pub per_file_limit: u64,
    #[serde(default = "default_total_limit")]
    pub total_limit: u64,
    #[serde(default = "default_soft_margin")]
    pub soft_margin: f64,
    /// Glob patterns excluded in addition to the built-in policy
    #[serde(default)]
    pub extra_exclusions: Vec<String>,
}

impl Default for CodeChangesSection {
    fn default() -> Self {
        Self {
            per_file_limit: default_per_file_limit(),
            total_limit: default_total_limit(),
            soft_margin: default_soft_margin(),
            extra_exclusions: Vec::new(),
        }
    }
}

fn default_per_file_limit() -> u64 {
    DEFAULT_PER_FILE_LIMIT
}

fn default_total_limit() -> u64 {
    DEFAULT_TOTAL_LIMIT
}

fn default_soft_margin() -> f64 {
    DEFAULT_SOFT_MARGIN
}

/// Coverage thresholds, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSection {
    #[serde(default = "default_min_unit")]
    pub min_unit: f64,
    #[serde(default = "default_min_integration")]
    pub min_integration: f64,
    #[serde(default = "default_min_branch")]
    pub min_branch: f64,
    #[serde(default)]
    pub allow_regression: bool,
}

impl Default for CoverageSection {
    fn default() -> Self {
        Self {
            min_unit: default_min_unit(),
            min_integration: default_min_integration(),
            min_branch: default_min_branch(),
            allow_regression: false,
        }
    }
}

fn default_min_unit() -> f64 {
    DEFAULT_MIN_UNIT
}

fn default_min_integration() -> f64 {
    DEFAULT_MIN_INTEGRATION
}

fn default_min_branch() -> f64 {
    DEFAULT_MIN_BRANCH
}

/// Refactor phase settings and quality targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactorSection {
    #[serde(default = "default_refactor_specialist")]
    pub specialist: String,
    #[serde(default = "default_max_complexity")]
    pub max_cyclomatic_complexity: u32,
    #[serde(default = "default_max_method_length")]
    pub max_method_length: u32,
    #[serde(default = "default_code_smells")]
    pub code_smells: Vec<String>,
}

impl Default for RefactorSection {
    fn default() -> Self {
        Self {
            specialist: default_refactor_specialist(),
            max_cyclomatic_complexity: default_max_complexity(),
            max_method_length: default_max_method_length(),
            code_smells: default_code_smells(),
        }
    }
}

fn default_refactor_specialist() -> String {
    DEFAULT_REFACTOR_SPECIALIST.to_string()
}

fn default_max_complexity() -> u32 {
    QualityTargets::default().max_cyclomatic_complexity
}

fn default_max_method_length() -> u32 {
    QualityTargets::default().max_method_length
}

fn default_code_smells() -> Vec<String> {
    QualityTargets::default()
        .code_smells
        .into_iter()
        .map(String::from)
        .collect()
}

/// The complete tdd.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TddToml {
    #[serde(default)]
    pub delegation: DelegationSection,
    #[serde(default)]
    pub green: GreenSection,
    #[serde(default)]
    pub code_changes: CodeChangesSection,
    #[serde(default)]
    pub coverage: CoverageSection,
    #[serde(default)]
    pub refactor: RefactorSection,
}

impl TddToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tdd.toml")
    }

    /// Load `tdd.toml` from `dir`, or the defaults when the file doesn't exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize tdd.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Delegation timeout, with the environment taking precedence.
    pub fn delegation_timeout_ms(&self) -> u64 {
        env_parse(ENV_TIMEOUT_MS).unwrap_or(self.delegation.timeout_ms)
    }

    /// Green phase attempt budget, with the environment taking precedence.
    pub fn max_retries(&self) -> u32 {
        env_parse(ENV_MAX_RETRIES).unwrap_or(self.green.max_retries)
    }

    pub fn code_change_limits(&self) -> CodeChangeLimits {
        CodeChangeLimits::new(self.code_changes.per_file_limit, self.code_changes.total_limit)
            .with_soft_margin(self.code_changes.soft_margin)
    }

    /// Build a validator from the limits and extra exclusions.
    /// Fails when an exclusion is not a valid glob.
    pub fn code_change_validator(&self) -> Result<CodeChangeValidator> {
        let exclusions = ExclusionPolicy::with_extra_patterns(&self.code_changes.extra_exclusions)?;
        Ok(CodeChangeValidator::new(self.code_change_limits(), exclusions))
    }

    pub fn coverage_thresholds(&self) -> CoverageThresholds {
        let allow_regression = env_flag(ENV_ALLOW_REGRESSION).unwrap_or(self.coverage.allow_regression);
        CoverageThresholds {
            min_unit: self.coverage.min_unit,
            min_integration: self.coverage.min_integration,
            min_branch: self.coverage.min_branch,
            allow_regression,
        }
    }

    pub fn quality_targets(&self) -> QualityTargets {
        QualityTargets {
            max_cyclomatic_complexity: self.refactor.max_cyclomatic_complexity,
            max_method_length: self.refactor.max_method_length,
            code_smells: self
                .refactor
                .code_smells
                .iter()
                .cloned()
                .map(CodeSmell::from)
                .collect(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.delegation.timeout_ms == 0 {
            warnings.push("delegation.timeout_ms is 0; every delegation would be rejected".to_string());
        }
        if self.green.max_retries == 0 {
            warnings.push("green.max_retries is 0; one attempt will still be made".to_string());
        }
        if self.code_changes.per_file_limit == 0 || self.code_changes.total_limit == 0 {
            warnings.push("code_changes limits of 0 reject every non-empty change".to_string());
        }
        if self.code_changes.per_file_limit > self.code_changes.total_limit {
            warnings.push(format!(
                "code_changes.per_file_limit ({}) exceeds total_limit ({})",
                self.code_changes.per_file_limit, self.code_changes.total_limit
            ));
        }
        let margin = self.code_changes.soft_margin;
        if !(margin > 0.0 && margin <= 1.0) {
            warnings.push(format!(
                "Invalid code_changes.soft_margin {}: should be in (0, 1]",
                margin
            ));
        }
        for pattern in &self.code_changes.extra_exclusions {
            if glob::Pattern::new(pattern).is_err() {
                warnings.push(format!("Invalid exclusion pattern '{}'", pattern));
            }
        }

        for (name, value) in [
            ("min_unit", self.coverage.min_unit),
            ("min_integration", self.coverage.min_integration),
            ("min_branch", self.coverage.min_branch),
        ] {
            if !(0.0..=100.0).contains(&value) {
                warnings.push(format!(
                    "Invalid coverage.{} {}: should be a percentage between 0 and 100",
                    name, value
                ));
            }
        }

        warnings
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [ENV_TIMEOUT_MS, ENV_MAX_RETRIES, ENV_ALLOW_REGRESSION] {
            unsafe { std::env::remove_var(key) };
        }
    }

    // =========================================
    // Parsing tests
    // =========================================

    #[test]
    fn test_defaults_when_empty() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = TddToml::parse("").unwrap();
        assert_eq!(config.delegation_timeout_ms(), 300_000);
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.green.specialist, "tdd-green-implementer");
        assert_eq!(config.refactor.specialist, "tdd-refactorer");
        assert_eq!(config.coverage_thresholds(), CoverageThresholds::default());
        assert_eq!(config.quality_targets(), QualityTargets::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let content = r#"
[code_changes]
per_file_limit = 100
extra_exclusions = ["generated/**"]

[coverage]
min_branch = 60.0

[refactor]
code_smells = ["long_method", "god-object"]
"#;
        let config = TddToml::parse(content).unwrap();
        let limits = config.code_change_limits();
        assert_eq!(limits.per_file_limit, 100);
        assert_eq!(limits.total_limit, 2000);
        assert_eq!(config.coverage.min_branch, 60.0);
        assert_eq!(config.coverage.min_unit, 80.0);

        let targets = config.quality_targets();
        assert_eq!(targets.code_smells[0], CodeSmell::LongMethod);
        assert_eq!(targets.code_smells[1], CodeSmell::Other("god-object".to_string()));

        let validator = config.code_change_validator().unwrap();
        assert_eq!(validator.limits().per_file_limit, 100);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(TddToml::parse("[delegation\ntimeout_ms = ").is_err());
    }

    #[test]
    fn test_invalid_exclusion_pattern() {
        let content = r#"
[code_changes]
extra_exclusions = ["[unclosed"]
"#;
        let config = TddToml::parse(content).unwrap();
        assert!(config.code_change_validator().is_err());
        assert!(config.validate().iter().any(|w| w.contains("[unclosed")));
    }

    // =========================================
    // File tests
    // =========================================

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = TddToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.green.max_retries, 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = TddToml::default();
        config.green.max_retries = 4;
        config.code_changes.extra_exclusions = vec!["dist/**".to_string()];

        let path = dir.path().join(CONFIG_FILE_NAME);
        config.save(&path).unwrap();

        let loaded = TddToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.green.max_retries, 4);
        assert_eq!(loaded.code_changes.extra_exclusions, vec!["dist/**"]);
    }

    // =========================================
    // Environment override tests
    // =========================================

    #[test]
    fn test_env_overrides_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = TddToml::parse("[green]\nmax_retries = 5\n").unwrap();
        assert_eq!(config.max_retries(), 5);

        unsafe {
            std::env::set_var(ENV_MAX_RETRIES, "3");
            std::env::set_var(ENV_TIMEOUT_MS, "1500");
            std::env::set_var(ENV_ALLOW_REGRESSION, "true");
        }
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.delegation_timeout_ms(), 1500);
        assert!(config.coverage_thresholds().allow_regression);

        unsafe { std::env::set_var(ENV_MAX_RETRIES, "not-a-number") };
        assert_eq!(config.max_retries(), 5);

        clear_env();
    }

    // =========================================
    // Validation tests
    // =========================================

    #[test]
    fn test_validate_reports_bad_values() {
        let content = r#"
[delegation]
timeout_ms = 0

[code_changes]
soft_margin = 1.5

[coverage]
min_unit = 120.0
"#;
        let warnings = TddToml::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("soft_margin")));
        assert!(warnings.iter().any(|w| w.contains("coverage.min_unit")));
    }
}
