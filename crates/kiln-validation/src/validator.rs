//! Turning tool runs into validation results
//!
//! Three outcomes must stay distinct:
//! - the tool exited cleanly, or filtering removed every diagnostic: `valid = true`
//! - the tool reported diagnostics, or failed with output we cannot parse: `valid = false`
//! - the tool failed and printed nothing: [`KilnError::ValidationInfra`]

use crate::parser::{
    filter_by_path, group_by_artifact, header_file, parse_lint_json, parse_type_diagnostics,
    parse_type_errors, path_within, DiagnosticGroups, Grouped,
};
use crate::runner::{ToolOutput, ToolRunner};
use kiln_core::{Diagnostic, KilnError, QualityResult, Result, ValidationResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Assess type-checker output, optionally narrowed to a path prefix
pub fn assess(tool: &str, output: &ToolOutput, filter: Option<&str>) -> Result<ValidationResult> {
    let combined = output.combined();

    if output.success() {
        let mut result =
            ValidationResult::from_diagnostics(parse_type_diagnostics(&combined), combined);
        result.valid = true;
        return Ok(result);
    }

    if combined.is_empty() {
        return Err(KilnError::ValidationInfra {
            tool: tool.to_string(),
            exit_code: output.exit_code,
        });
    }

    let has_headers = combined.lines().any(|l| header_file(l).is_some());
    let relevant = match filter {
        Some(prefix) if has_headers => {
            let lines = filter_by_path(&combined, prefix);
            if lines.is_empty() {
                debug!(tool, prefix, "filter removed every diagnostic, treating as pass");
                return Ok(ValidationResult::passed(combined));
            }
            lines.join("\n")
        }
        _ => combined.clone(),
    };

    let mut result =
        ValidationResult::from_diagnostics(parse_type_diagnostics(&relevant), combined.clone());
    result.unattributed = parse_type_errors(&relevant).unattributed;

    if result.diagnostics.is_empty() {
        // Failing exit with output we cannot parse: never a pass
        result.valid = false;
        result.unattributed = combined
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(result)
}

/// Assess lint output (ESLint JSON on stdout), optionally narrowed to a path prefix
pub fn assess_lint(tool: &str, output: &ToolOutput, filter: Option<&str>) -> Result<Vec<Diagnostic>> {
    if output.stdout.trim().is_empty() {
        if output.success() {
            return Ok(Vec::new());
        }
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            return Err(KilnError::Tool(format!(
                "{} exited with {:?}: {}",
                tool, output.exit_code, stderr
            )));
        }
        return Err(KilnError::ValidationInfra {
            tool: tool.to_string(),
            exit_code: output.exit_code,
        });
    }

    let diagnostics = parse_lint_json(&output.stdout)?;
    Ok(match filter {
        Some(prefix) => diagnostics
            .into_iter()
            .filter(|d| path_within(&d.file, prefix))
            .collect(),
        None => diagnostics,
    })
}

/// Whole-tree type-check outcome with per-artifact attribution
#[derive(Debug, Clone)]
pub struct TreeReport {
    pub result: ValidationResult,
    /// Raw diagnostic lines per artifact
    pub lines: DiagnosticGroups,
    /// Structured diagnostics per artifact
    pub issues: Grouped<Diagnostic>,
}

impl TreeReport {
    pub fn passed(&self) -> bool {
        self.result.valid
    }
}

/// Type checker bound to a tool runner
#[derive(Clone)]
pub struct TypeChecker {
    runner: Arc<dyn ToolRunner>,
}

impl TypeChecker {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    /// Check the whole project
    pub async fn check_tree(&self) -> Result<TreeReport> {
        let output = self.runner.run(None).await?;
        let result = assess(self.runner.name(), &output, None)?;

        let (lines, issues) = if result.valid {
            (DiagnosticGroups::default(), Grouped::default())
        } else {
            let raw = output.combined();
            (
                parse_type_errors(&raw),
                group_by_artifact(result.diagnostics.clone()),
            )
        };

        info!(
            tool = self.runner.name(),
            valid = result.valid,
            errors = result.error_count,
            artifacts = lines.len(),
            "type check complete"
        );

        Ok(TreeReport {
            result,
            lines,
            issues,
        })
    }

    /// Check one subpath (an artifact directory) of the project
    pub async fn check_path(&self, path_prefix: &str) -> Result<ValidationResult> {
        let output = self.runner.run(Some(path_prefix)).await?;
        assess(self.runner.name(), &output, Some(path_prefix))
    }
}

/// Linter bound to a tool runner
#[derive(Clone)]
pub struct LintChecker {
    runner: Arc<dyn ToolRunner>,
}

impl LintChecker {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    /// Lint the whole project, grouped by artifact
    pub async fn lint_tree(&self) -> Result<Grouped<Diagnostic>> {
        let output = self.runner.run(None).await?;
        let diagnostics = assess_lint(self.runner.name(), &output, None)?;
        let groups = group_by_artifact(diagnostics);
        if !groups.unattributed.is_empty() {
            warn!(
                count = groups.unattributed.len(),
                "lint diagnostics outside any artifact"
            );
        }
        Ok(groups)
    }

    /// Lint one subpath of the project
    pub async fn lint_path(&self, path_prefix: &str) -> Result<QualityResult> {
        let output = self.runner.run(Some(path_prefix)).await?;
        let diagnostics = assess_lint(self.runner.name(), &output, Some(path_prefix))?;
        Ok(QualityResult::from_issues(diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockToolRunner;

    const TWO_ARTIFACTS: &str = "ui/elements/Button/Button.tsx(3,5): error TS2322: Type 'string' is not assignable.\nType 'string' is not assignable to type 'number'.\n\nui/elements/Input/Input.tsx(1,1): error TS1000: x";

    #[test]
    fn test_clean_exit_is_valid() {
        let result = assess("tsc", &ToolOutput::clean(), None).unwrap();
        assert!(result.valid);
        assert_eq!(result.error_count, 0);
    }

    #[test]
    fn test_diagnostics_present() {
        let output = ToolOutput::new(2, TWO_ARTIFACTS, "");
        let result = assess("tsc", &output, None).unwrap();

        assert!(!result.valid);
        assert_eq!(result.error_count, 2);
        assert_eq!(result.raw_output, TWO_ARTIFACTS);
    }

    #[test]
    fn test_filter_to_empty_is_success() {
        let output = ToolOutput::new(2, TWO_ARTIFACTS, "");
        let result = assess("tsc", &output, Some("ui/modules/Header")).unwrap();

        assert!(result.valid);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_filter_keeps_target_only() {
        let output = ToolOutput::new(2, TWO_ARTIFACTS, "");
        let result = assess("tsc", &output, Some("ui/elements/Input")).unwrap();

        assert!(!result.valid);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.diagnostics[0].file, "ui/elements/Input/Input.tsx");
    }

    #[test]
    fn test_infra_failure_is_distinct() {
        let output = ToolOutput::new(1, "", "   ");
        let err = assess("tsc", &output, None).unwrap_err();
        assert!(err.is_infra_failure());

        // Also distinct when filtering
        let err = assess("tsc", &output, Some("ui/elements/Button")).unwrap_err();
        assert!(matches!(err, KilnError::ValidationInfra { exit_code: Some(1), .. }));
    }

    #[test]
    fn test_unparseable_failure_is_not_a_pass() {
        let output = ToolOutput::new(1, "", "error: cannot find tsconfig.json");
        let result = assess("tsc", &output, None).unwrap();

        assert!(!result.valid);
        assert_eq!(result.unattributed, vec!["error: cannot find tsconfig.json"]);
    }

    #[test]
    fn test_lint_assessment() {
        let json = r#"[{"filePath":"/p/ui/elements/Button/Button.tsx","messages":[{"line":1,"column":1,"message":"no","ruleId":"r","severity":2}]},{"filePath":"/p/ui/modules/Nav/Nav.tsx","messages":[{"line":1,"column":1,"message":"meh","ruleId":"w","severity":1}]}]"#;
        let output = ToolOutput::new(1, json, "");

        assert_eq!(assess_lint("eslint", &output, None).unwrap().len(), 2);
        assert_eq!(
            assess_lint("eslint", &output, Some("ui/modules/Nav"))
                .unwrap()
                .len(),
            1
        );
        assert!(assess_lint("eslint", &ToolOutput::clean(), None)
            .unwrap()
            .is_empty());
        assert!(assess_lint("eslint", &ToolOutput::new(2, "", "   "), None)
            .unwrap_err()
            .is_infra_failure());
    }

    #[test]
    fn test_lint_filter_stops_at_segment_boundary() {
        let json = r#"[{"filePath":"/p/ui/elements/ButtonGroup/ButtonGroup.tsx","messages":[{"line":1,"column":1,"message":"no","ruleId":"r","severity":2}]}]"#;
        let output = ToolOutput::new(1, json, "");

        let button = assess_lint("eslint", &output, Some("ui/elements/Button")).unwrap();
        assert!(button.is_empty());

        let group = assess_lint("eslint", &output, Some("ui/elements/ButtonGroup")).unwrap();
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_lint_crash_carries_stderr() {
        let output = ToolOutput::new(2, "", "Oops! Something went wrong: missing config\n");
        let err = assess_lint("eslint", &output, Some("ui/elements/Button")).unwrap_err();

        assert!(!err.is_infra_failure());
        match err {
            KilnError::Tool(message) => {
                assert!(message.contains("eslint"));
                assert!(message.contains("missing config"));
            }
            other => panic!("expected tool error, got {:?}", other),
        }
    }

    #[test]
    fn test_filtered_unparseable_failure_is_not_a_pass() {
        let output = ToolOutput::new(
            2,
            "error TS5058: The specified path does not exist: 'tsconfig.json'.",
            "",
        );
        let result = assess("tsc", &output, Some("ui/elements/Button")).unwrap();

        assert!(!result.valid);
        assert_eq!(
            result.unattributed,
            vec!["error TS5058: The specified path does not exist: 'tsconfig.json'."]
        );
    }

    #[tokio::test]
    async fn test_check_path_surfaces_config_failure() {
        let runner = MockToolRunner::new().with_response(
            Some("ui/elements/Button"),
            ToolOutput::new(1, "", "error TS5083: Cannot read file 'tsconfig.json'."),
        );
        let checker = TypeChecker::new(Arc::new(runner));

        let result = checker.check_path("ui/elements/Button").await.unwrap();
        assert!(!result.valid);
        assert!(!result.unattributed.is_empty());
    }

    #[tokio::test]
    async fn test_type_checker_tree_report() {
        let runner = MockToolRunner::new().with_response(None, ToolOutput::new(2, TWO_ARTIFACTS, ""));
        let checker = TypeChecker::new(Arc::new(runner));

        let report = checker.check_tree().await.unwrap();
        assert!(!report.passed());
        assert_eq!(report.lines.get("Button").unwrap().len(), 2);
        assert_eq!(report.issues.get("Input").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_type_checker_check_path() {
        let runner = MockToolRunner::new()
            .with_response(Some("ui/elements/Button"), ToolOutput::new(2, TWO_ARTIFACTS, ""));
        let checker = TypeChecker::new(Arc::new(runner));

        let result = checker.check_path("ui/elements/Button").await.unwrap();
        assert_eq!(result.error_count, 1);
        assert_eq!(result.diagnostics[0].continuation.len(), 1);
    }

    #[tokio::test]
    async fn test_lint_checker() {
        let json = r#"[{"filePath":"ui/elements/Button/Button.tsx","messages":[{"line":2,"column":4,"message":"Unexpected any","ruleId":"no-explicit-any","severity":2}]}]"#;
        let runner = MockToolRunner::new()
            .with_response(None, ToolOutput::new(1, json, ""))
            .with_response(Some("ui/elements/Button"), ToolOutput::clean());
        let checker = LintChecker::new(Arc::new(runner));

        let groups = checker.lint_tree().await.unwrap();
        assert_eq!(groups.get("Button").unwrap().len(), 1);

        let quality = checker.lint_path("ui/elements/Button").await.unwrap();
        assert!(quality.valid);
    }
}
