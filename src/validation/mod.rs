//! Pure, stateless validators for delegated output.
//!
//! Validators never raise: each returns its own [`ValidationResult`], and two
//! validators never write into the same result. Because they hold no mutable
//! state, any number of tasks may be validated concurrently.
//!
//! - [`code_changes`]: exclusion, scope, and size checks on proposed diffs
//! - [`coverage`]: threshold and regression checks on test coverage

pub mod code_changes;
pub mod coverage;
pub mod result;

pub use code_changes::{
    CodeChangeLimits, CodeChangeValidator, ExclusionCategory, ExclusionPolicy, is_within_scope,
    validate_code_changes,
};
pub use coverage::{CoverageThresholds, is_recognized_framework, validate_test_coverage};
pub use result::ValidationResult;
