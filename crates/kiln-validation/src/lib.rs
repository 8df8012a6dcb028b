//! # kiln-validation
//!
//! Runs static-analysis tools and turns their text output into structured,
//! artifact-attributed diagnostics.
//!
//! This crate provides:
//! - [`ToolRunner`] with a subprocess implementation and a scripted mock
//! - the diagnostic parser for type-checker text and ESLint JSON
//! - [`assess`], which separates "valid", "diagnostics present" and
//!   "the tool itself failed"
//! - [`TypeChecker`] and [`LintChecker`] for whole-tree and per-artifact runs

mod parser;
mod runner;
mod validator;

pub use parser::{
    artifact_from_path, extract_file_errors, filter_by_path, group_by_artifact, header_file,
    parse_lint_json, parse_type_diagnostics, parse_type_errors, path_within, DiagnosticGroups, Grouped,
};
pub use runner::{CommandToolRunner, MockToolRunner, ToolOutput, ToolRunner, TARGET_PLACEHOLDER};
pub use validator::{assess, assess_lint, LintChecker, TreeReport, TypeChecker};
