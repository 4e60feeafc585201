//! Prompt packaging for green and refactor delegations.
//!
//! Prompts only carry task fields; no reasoning happens here.

use crate::tdd::types::{CodeChange, FixTask, QualityTargets, RetryContext, TddState};

fn bullet_list(items: impl IntoIterator<Item = String>, empty: &str) -> String {
    let lines: Vec<String> = items.into_iter().map(|item| format!("- {}", item)).collect();
    if lines.is_empty() {
        empty.to_string()
    } else {
        lines.join("\n")
    }
}

/// Build the prompt for a green-phase attempt.
pub fn build_green_prompt(
    task: &FixTask,
    state: &TddState,
    session_id: &str,
    allowed_paths: &[String],
    retry: Option<&RetryContext>,
) -> String {
    let files_section = bullet_list(
        allowed_paths.iter().cloned(),
        "No affected files were declared. Do not modify any files.",
    );

    let retry_section = retry
        .map(|ctx| {
            let history = bullet_list(
                ctx.failure_history
                    .iter()
                    .enumerate()
                    .map(|(i, reason)| format!("Attempt {}: {}", i + 1, reason)),
                "",
            );
            format!(
                r#"
## Retry Feedback

This is attempt {attempt}. Changes from earlier attempts were discarded; start again from the pre-fix code.
The previous attempt failed because: {reason}

Failure history:
{history}
"#,
                attempt = ctx.attempt_number,
                reason = ctx.previous_failure_reason,
                history = history,
            )
        })
        .unwrap_or_default();

    format!(
        r#"# Green Phase: Make the Failing Test Pass

Session: {session_id}

## Task
{description}

- Failing test: {failing_test}
- Root cause: {root_cause}
- Fix strategy: {strategy}

## Allowed Files

Only modify these files or files under these directories:
{files_section}

## Coverage Requirements

Add or update tests for the fix. Coverage must not drop below the baseline
(line {baseline_line:.1}%, branch {baseline_branch:.1}%).
{retry_section}
## Output Format

Respond with a JSON object:

```json
{{
  "success": true,
  "testsPass": true,
  "codeChanges": [
    {{"path": "src/file.ts", "changeType": "modified", "linesAdded": 10, "linesRemoved": 2}}
  ],
  "testChanges": [
    {{"path": "tests/file.test.ts", "framework": "jest", "testType": "unit",
      "coverage": {{"lineCoverage": 85.0, "branchCoverage": 75.0}}}}
  ],
  "testResults": {{"passed": 12, "failed": 0}}
}}
```
"#,
        session_id = session_id,
        description = task.description,
        failing_test = task.failing_test_ref,
        root_cause = or_unknown(&task.root_cause),
        strategy = or_unknown(&task.strategy),
        files_section = files_section,
        baseline_line = state.coverage_baseline.line_coverage,
        baseline_branch = state.coverage_baseline.branch_coverage,
        retry_section = retry_section,
    )
}

/// Build the prompt for the refactor delegation.
pub fn build_refactor_prompt(
    code_changes: &[CodeChange],
    targets: &QualityTargets,
    session_id: &str,
) -> String {
    let files_section = bullet_list(
        code_changes
            .iter()
            .map(|c| format!("{} ({}, +{} -{})", c.path, c.change_type, c.lines_added, c.lines_removed)),
        "No files were changed in the green phase.",
    );
    let smells = bullet_list(
        targets.code_smells.iter().map(ToString::to_string),
        "None specified.",
    );

    format!(
        r#"# Refactor Phase: Improve Quality Without Changing Behavior

Session: {session_id}

The green phase produced a passing fix. Refactor only the code below.
All tests must still pass and complexity must not increase.

## Files From the Green Phase
{files_section}

## Quality Targets
- Maximum cyclomatic complexity: {max_complexity}
- Maximum method length: {max_method_length} lines

## Code Smells to Remove (never introduce new ones)
{smells}

## Output Format

Respond with a JSON object:

```json
{{
  "success": true,
  "testsStillPass": true,
  "refactoredChanges": [
    {{"path": "src/file.ts", "changeType": "modified", "linesAdded": 4, "linesRemoved": 9}}
  ],
  "qualityMetrics": {{
    "complexityBefore": 12,
    "complexityAfter": 8,
    "maxMethodLength": 35,
    "codeSmellsBefore": [{{"kind": "long-method", "location": "src/file.ts:40"}}],
    "codeSmellsAfter": []
  }}
}}
```
"#,
        session_id = session_id,
        files_section = files_section,
        max_complexity = targets.max_cyclomatic_complexity,
        max_method_length = targets.max_method_length,
        smells = smells,
    )
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() { "unknown" } else { value }
}
