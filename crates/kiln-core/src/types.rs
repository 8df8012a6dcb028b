//! Core type definitions for the Kiln pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Atomic-design tier an artifact belongs to
///
/// Declaration order is the lookup priority used by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Elements,
    Components,
    Modules,
    Icons,
}

impl Tier {
    /// All tiers in registry lookup order
    pub const ALL: [Tier; 4] = [Tier::Elements, Tier::Components, Tier::Modules, Tier::Icons];

    /// Tiers in the order they must be generated (dependencies first)
    pub const GENERATION_ORDER: [Tier; 4] =
        [Tier::Icons, Tier::Elements, Tier::Components, Tier::Modules];

    /// Directory name of this tier under the output root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Elements => "elements",
            Self::Components => "components",
            Self::Modules => "modules",
            Self::Icons => "icons",
        }
    }

    /// Dependency rank. An artifact may only reference artifacts of equal or lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Icons => 0,
            Self::Elements => 1,
            Self::Components => 2,
            Self::Modules => 3,
        }
    }

    /// Whether an artifact in this tier may import an artifact in `other`
    pub fn may_reference(&self, other: Tier) -> bool {
        other.rank() <= self.rank()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elements" | "element" => Ok(Self::Elements),
            "components" | "component" => Ok(Self::Components),
            "modules" | "module" => Ok(Self::Modules),
            "icons" | "icon" => Ok(Self::Icons),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

/// A generated artifact known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub tier: Tier,
    /// Path of the artifact source file
    pub path: PathBuf,
    pub added_at: DateTime<Utc>,
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    /// Map an ESLint numeric severity (2 = error, 1 = warning)
    pub fn from_lint_level(level: u8) -> Option<Self> {
        match level {
            2 => Some(Self::Error),
            1 => Some(Self::Warning),
            _ => None,
        }
    }
}

/// A single structured diagnostic from a static-analysis tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    /// Lint rule id; absent for type-checker diagnostics
    pub rule: Option<String>,
    /// Type-checker code such as `TS2322`
    #[serde(default)]
    pub code: Option<String>,
    pub severity: Severity,
    /// Explanation lines that followed the diagnostic header
    #[serde(default)]
    pub continuation: Vec<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// One-line rendering used in prompts and logs
    pub fn render(&self) -> String {
        let label = self
            .rule
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("diagnostic");
        let mut out = format!(
            "{}({},{}): {:?} {}: {}",
            self.file, self.line, self.column, self.severity, label, self.message
        );
        for line in &self.continuation {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

/// Outcome of running the type checker over a tree or a single artifact
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Raw tool output, kept for audit
    pub raw_output: String,
    /// Diagnostic lines that could not be attributed to an artifact
    #[serde(default)]
    pub unattributed: Vec<String>,
}

impl ValidationResult {
    /// A passing result with the given raw output
    pub fn passed(raw_output: impl Into<String>) -> Self {
        Self {
            valid: true,
            raw_output: raw_output.into(),
            ..Default::default()
        }
    }

    /// Build a result from structured diagnostics; valid when none is an error
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>, raw_output: impl Into<String>) -> Self {
        let error_count = diagnostics.iter().filter(|d| d.is_error()).count();
        let warning_count = diagnostics.len() - error_count;
        Self {
            valid: error_count == 0,
            error_count,
            warning_count,
            diagnostics,
            raw_output: raw_output.into(),
            unattributed: Vec::new(),
        }
    }
}

/// Outcome of the lint (quality) tool for one artifact
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityResult {
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub issues: Vec<Diagnostic>,
}

impl QualityResult {
    pub fn from_issues(issues: Vec<Diagnostic>) -> Self {
        let error_count = issues.iter().filter(|d| d.is_error()).count();
        Self {
            valid: error_count == 0,
            error_count,
            warning_count: issues.len() - error_count,
            issues,
        }
    }
}

/// Latest check recorded for an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactCheck {
    Type(ValidationResult),
    Quality(QualityResult),
}

impl ArtifactCheck {
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Type(r) => r.valid,
            Self::Quality(r) => r.valid,
        }
    }
}

/// Ledger entry for an artifact that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub component_name: String,
    pub path: PathBuf,
    pub errors: Vec<String>,
    pub issues: Vec<Diagnostic>,
    pub attempted_fix: bool,
    /// Repair cycles spent on this artifact during the run
    #[serde(default)]
    pub fix_attempts: u32,
}

impl FailureRecord {
    pub fn new(component_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            component_name: component_name.into(),
            path: path.into(),
            errors: Vec::new(),
            issues: Vec::new(),
            attempted_fix: false,
            fix_attempts: 0,
        }
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_issues(mut self, issues: Vec<Diagnostic>) -> Self {
        self.issues = issues;
        self
    }
}

/// One component requested by the design source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub tier: Tier,
    #[serde(default)]
    pub description: String,
}

/// Specification supplied by the design-source collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    pub name: String,
    pub components: Vec<ComponentSpec>,
    /// Visual tokens (colors, spacing, typography), passed through opaquely
    #[serde(default)]
    pub tokens: serde_json::Value,
}

/// Code produced by the synthesis service for one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub name: String,
    pub tier: Tier,
    pub code: String,
}

/// Input for a repair request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub name: String,
    pub tier: Tier,
    pub code: String,
    pub diagnostics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("Elements".parse::<Tier>().unwrap(), Tier::Elements);
        assert_eq!("icon".parse::<Tier>().unwrap(), Tier::Icons);
        assert!("widgets".parse::<Tier>().is_err());
        assert_eq!(Tier::Modules.to_string(), "modules");
    }

    #[test]
    fn test_tier_reference_direction() {
        assert!(Tier::Components.may_reference(Tier::Elements));
        assert!(Tier::Modules.may_reference(Tier::Components));
        assert!(Tier::Modules.may_reference(Tier::Elements));
        assert!(Tier::Elements.may_reference(Tier::Icons));
        assert!(!Tier::Elements.may_reference(Tier::Components));
        assert!(!Tier::Elements.may_reference(Tier::Modules));
        assert!(!Tier::Components.may_reference(Tier::Modules));
    }

    #[test]
    fn test_validation_result_counts() {
        let diag = |severity| Diagnostic {
            file: "ui/elements/Button/Button.tsx".to_string(),
            line: 1,
            column: 1,
            message: "x".to_string(),
            rule: None,
            code: None,
            severity,
            continuation: Vec::new(),
        };

        let result = ValidationResult::from_diagnostics(
            vec![diag(Severity::Error), diag(Severity::Warning), diag(Severity::Warning)],
            "raw",
        );
        assert!(!result.valid);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.warning_count, 2);

        let warnings_only = QualityResult::from_issues(vec![diag(Severity::Warning)]);
        assert!(warnings_only.valid);
    }

    #[test]
    fn test_lint_severity_mapping() {
        assert_eq!(Severity::from_lint_level(2), Some(Severity::Error));
        assert_eq!(Severity::from_lint_level(1), Some(Severity::Warning));
        assert_eq!(Severity::from_lint_level(0), None);
    }

    #[test]
    fn test_design_spec_deserialize() {
        let json = r#"{
            "name": "Dashboard",
            "components": [
                {"name": "Button", "tier": "elements", "description": "Primary button"},
                {"name": "Header", "tier": "modules"}
            ]
        }"#;
        let spec: DesignSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.components.len(), 2);
        assert_eq!(spec.components[1].tier, Tier::Modules);
        assert!(spec.components[1].description.is_empty());
        assert!(spec.tokens.is_null());
    }
}
