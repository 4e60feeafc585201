//! Validation of proposed file changes against exclusion, scope, and size policy.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. `parseable`: every change has a recognized change type
//! 2. `exclusions`: no path touches VCS internals, lock files, or vendored code
//! 3. `scope`: every path sits inside the allowed set
//! 4. `per_file_size` / `total_size`: line counts stay under the limits
//!
//! Exclusion always runs before size, so an excluded path fails even when it
//! changes zero lines. Size metrics are computed for every input regardless
//! of the outcome.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::tdd::types::{ChangeType, CodeChange};
use crate::validation::result::ValidationResult;

pub const DEFAULT_PER_FILE_LIMIT: u64 = 500;
pub const DEFAULT_TOTAL_LIMIT: u64 = 2000;
pub const DEFAULT_SOFT_MARGIN: f64 = 0.8;

const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];
const VENDORED_DIRS: &[&str] = &["node_modules", "vendor", "third_party", ".venv"];
const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Cargo.lock",
    "Gemfile.lock",
    "poetry.lock",
    "Pipfile.lock",
    "composer.lock",
    "go.sum",
];

/// Line-count limits for a set of changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodeChangeLimits {
    pub per_file_limit: u64,
    pub total_limit: u64,
    /// Fraction of a limit above which a warning is emitted.
    pub soft_margin: f64,
}

impl Default for CodeChangeLimits {
    fn default() -> Self {
        Self {
            per_file_limit: DEFAULT_PER_FILE_LIMIT,
            total_limit: DEFAULT_TOTAL_LIMIT,
            soft_margin: DEFAULT_SOFT_MARGIN,
        }
    }
}

impl CodeChangeLimits {
    pub fn new(per_file_limit: u64, total_limit: u64) -> Self {
        Self {
            per_file_limit,
            total_limit,
            ..Self::default()
        }
    }

    pub fn with_soft_margin(mut self, soft_margin: f64) -> Self {
        self.soft_margin = soft_margin;
        self
    }
}

/// Why a path is off limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionCategory {
    VersionControl,
    LockFile,
    Vendored,
    Configured,
}

impl std::fmt::Display for ExclusionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionControl => write!(f, "version-control internals"),
            Self::LockFile => write!(f, "dependency lock file"),
            Self::Vendored => write!(f, "vendored directory"),
            Self::Configured => write!(f, "configured exclusion"),
        }
    }
}

/// Paths a specialist worker must never touch.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    extra_patterns: Vec<Pattern>,
}

impl ExclusionPolicy {
    /// Built-in exclusions plus extra glob patterns.
    pub fn with_extra_patterns(patterns: &[String]) -> Result<Self> {
        let extra_patterns = patterns
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("Invalid exclusion pattern '{}'", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { extra_patterns })
    }

    /// Return the exclusion category for `path`, if any.
    pub fn classify(&self, path: &str) -> Option<ExclusionCategory> {
        let normalized = normalize_path(path).unwrap_or_else(|| path.trim().replace('\\', "/"));
        let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();

        if components.iter().any(|c| VCS_DIRS.contains(c)) {
            return Some(ExclusionCategory::VersionControl);
        }

        if let Some(file_name) = components.last()
            && (LOCK_FILES.contains(file_name) || file_name.ends_with(".lock"))
        {
            return Some(ExclusionCategory::LockFile);
        }

        let dirs = &components[..components.len().saturating_sub(1)];
        if dirs.iter().any(|c| VENDORED_DIRS.contains(c)) {
            return Some(ExclusionCategory::Vendored);
        }

        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        if self
            .extra_patterns
            .iter()
            .any(|p| p.matches_with(&normalized, options))
        {
            return Some(ExclusionCategory::Configured);
        }

        None
    }
}

/// Stateless validator; holds only policy.
#[derive(Debug, Clone, Default)]
pub struct CodeChangeValidator {
    limits: CodeChangeLimits,
    exclusions: ExclusionPolicy,
}

impl CodeChangeValidator {
    pub fn new(limits: CodeChangeLimits, exclusions: ExclusionPolicy) -> Self {
        Self { limits, exclusions }
    }

    pub fn limits(&self) -> &CodeChangeLimits {
        &self.limits
    }

    pub fn validate(&self, changes: &[CodeChange], allowed_paths: &[String]) -> ValidationResult {
        let mut result = ValidationResult::new();
        record_size_metrics(&mut result, changes);

        if changes.is_empty() {
            result.add_warning("No code changes were proposed");
        }

        // 1. Parseability
        let invalid: Vec<&CodeChange> = changes
            .iter()
            .filter(|c| !c.change_type.is_recognized())
            .collect();
        result.record_check("parseable", invalid.is_empty());
        if let Some(first) = invalid.first() {
            result.fail(format!(
                "invalid change type '{}' for {}",
                first.change_type, first.path
            ));
            return result;
        }

        // 2. Exclusions
        let excluded = changes
            .iter()
            .find_map(|c| self.exclusions.classify(&c.path).map(|cat| (c, cat)));
        result.record_check("exclusions", excluded.is_none());
        if let Some((change, category)) = excluded {
            result.fail(format!(
                "excluded path {} ({}) may not be modified",
                change.path, category
            ));
            return result;
        }

        // 3. Scope
        let out_of_scope: Vec<&str> = changes
            .iter()
            .filter(|c| !is_within_scope(&c.path, allowed_paths))
            .map(|c| c.path.as_str())
            .collect();
        result.record_check("scope", out_of_scope.is_empty());
        if !out_of_scope.is_empty() {
            result.fail(format!(
                "changes outside allowed scope: {}",
                out_of_scope.join(", ")
            ));
            return result;
        }

        // 4. Size
        let per_file = self.limits.per_file_limit;
        let oversized = changes.iter().find(|c| c.total_lines() > per_file);
        result.record_check("per_file_size", oversized.is_none());
        if let Some(change) = oversized {
            result.fail(format!(
                "{} changes {} lines, exceeding the per-file limit of {}",
                change.path,
                change.total_lines(),
                per_file
            ));
            return result;
        }
        for change in changes {
            if above_soft_margin(change.total_lines(), per_file, self.limits.soft_margin) {
                result.add_warning(format!(
                    "{} changes {} lines, approaching the per-file limit of {}",
                    change.path,
                    change.total_lines(),
                    per_file
                ));
            }
        }

        let total: u64 = changes.iter().map(CodeChange::total_lines).sum();
        let total_limit = self.limits.total_limit;
        result.record_check("total_size", total <= total_limit);
        if total > total_limit {
            result.fail(format!(
                "total change size {} lines exceeds the limit of {}",
                total, total_limit
            ));
            return result;
        }
        if above_soft_margin(total, total_limit, self.limits.soft_margin) {
            result.add_warning(format!(
                "total change size {} lines is approaching the limit of {}",
                total, total_limit
            ));
        }

        result
    }
}

/// Validate with default exclusions and the default soft margin.
pub fn validate_code_changes(
    changes: &[CodeChange],
    allowed_paths: &[String],
    per_file_limit: u64,
    total_limit: u64,
) -> ValidationResult {
    CodeChangeValidator::new(
        CodeChangeLimits::new(per_file_limit, total_limit),
        ExclusionPolicy::default(),
    )
    .validate(changes, allowed_paths)
}

/// Whether `path` is an allowed path or sits under one.
///
/// Entries match exactly, act as directory prefixes with or without a
/// trailing slash, and may be glob patterns. `.` allows everything; an empty
/// entry allows nothing. `.` and `..` segments are resolved first, and a path
/// that climbs above its root is never in scope. Absolute paths only match
/// absolute entries.
pub fn is_within_scope(path: &str, allowed_paths: &[String]) -> bool {
    let Some(path) = normalize_path(path) else {
        return false;
    };
    allowed_paths.iter().any(|entry| {
        if entry.trim().is_empty() {
            return false;
        }
        let Some(allowed) = normalize_path(entry) else {
            return false;
        };
        if allowed.starts_with('/') != path.starts_with('/') {
            return false;
        }
        if allowed.is_empty() || allowed == "/" {
            return true;
        }
        if path == allowed || path.starts_with(&format!("{}/", allowed)) {
            return true;
        }
        allowed.contains(['*', '?', '['])
            && Pattern::new(&allowed).is_ok_and(|p| p.matches(&path))
    })
}

/// Resolve `.` and `..` segments and unify separators.
/// Returns `None` when the path climbs above its root.
fn normalize_path(path: &str) -> Option<String> {
    let path = path.trim().replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    Some(if absolute { format!("/{}", joined) } else { joined })
}

fn above_soft_margin(value: u64, limit: u64, soft_margin: f64) -> bool {
    value as f64 > limit as f64 * soft_margin
}

fn record_size_metrics(result: &mut ValidationResult, changes: &[CodeChange]) {
    let added: u64 = changes.iter().map(|c| u64::from(c.lines_added)).sum();
    let removed: u64 = changes.iter().map(|c| u64::from(c.lines_removed)).sum();
    let largest = changes.iter().map(CodeChange::total_lines).max().unwrap_or(0);

    result.set_metric("total_lines_added", added as f64);
    result.set_metric("total_lines_removed", removed as f64);
    result.set_metric("total_lines_changed", (added + removed) as f64);
    result.set_metric("largest_file_lines", largest as f64);
    result.set_metric("files_changed", changes.len() as f64);

    let count = |kind: fn(&ChangeType) -> bool| changes.iter().filter(|c| kind(&c.change_type)).count() as f64;
    result.set_metric("files_added", count(|t| *t == ChangeType::Added));
    result.set_metric("files_modified", count(|t| *t == ChangeType::Modified));
    result.set_metric("files_deleted", count(|t| *t == ChangeType::Deleted));
    result.set_metric("files_unrecognized", count(|t| !t.is_recognized()));
}
