//! Diagnostic parsing for type-checker and linter output
//!
//! Type-checker output is line oriented:
//!
//! ```text
//! ui/elements/Button/Button.tsx(3,5): error TS2322: Type 'string' is not assignable.
//!   Type 'string' is not assignable to type 'number'.
//! ```
//!
//! A header line carries a `(line,col):` position marker. Every following
//! non-blank line belongs to the same diagnostic until the next header.
//! Headers are attributed to an artifact through the `<tier>/<Name>/<file>`
//! path fragment; anything else lands in the `unattributed` bucket.

use kiln_core::{Diagnostic, KilnError, Result, Severity, Tier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

static HEADER_RE: OnceLock<Regex> = OnceLock::new();

fn header_re() -> &'static Regex {
    HEADER_RE.get_or_init(|| {
        Regex::new(
            r"^(?P<file>.+?)\((?P<line>\d+),(?P<col>\d+)\):\s*(?:(?P<sev>error|warning)\s*(?P<code>TS\d+)?\s*:\s*)?(?P<msg>.*)$",
        )
        .expect("header pattern is valid")
    })
}

/// Line prefixes of re-wrapped type explanations
const CONTINUATION_KEYWORDS: [&str; 2] = ["Type ", "Its "];

/// Items grouped by the artifact they belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouped<T> {
    pub artifacts: BTreeMap<String, Vec<T>>,
    /// Items whose path matched no artifact
    pub unattributed: Vec<T>,
}

impl<T> Default for Grouped<T> {
    fn default() -> Self {
        Self {
            artifacts: BTreeMap::new(),
            unattributed: Vec::new(),
        }
    }
}

impl<T> Grouped<T> {
    pub fn get(&self, artifact: &str) -> Option<&[T]> {
        self.artifacts.get(artifact).map(Vec::as_slice)
    }

    /// Number of artifacts with at least one item
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.unattributed.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    fn push(&mut self, artifact: Option<&str>, item: T) {
        match artifact {
            Some(name) => self
                .artifacts
                .entry(name.to_string())
                .or_default()
                .push(item),
            None => self.unattributed.push(item),
        }
    }
}

/// Per-artifact diagnostic lines
pub type DiagnosticGroups = Grouped<String>;

/// File path of a diagnostic header line, if `line` is one
pub fn header_file(line: &str) -> Option<&str> {
    header_re()
        .captures(line)
        .and_then(|c| c.name("file"))
        .map(|m| m.as_str().trim())
}

/// Artifact a file path belongs to, from its last `<tier>/<Name>/...` fragment
pub fn artifact_from_path(path: &str) -> Option<(Tier, String)> {
    let segments: Vec<&str> = path.split(['/', '\\']).collect();
    // Need a file segment after the name, hence the upper bound
    (0..segments.len().saturating_sub(2)).rev().find_map(|i| {
        let tier: Tier = segments[i].parse().ok()?;
        if segments[i] != tier.dir_name() || segments[i + 1].is_empty() {
            return None;
        }
        Some((tier, segments[i + 1].to_string()))
    })
}

fn is_continuation_keyword(line: &str) -> bool {
    let trimmed = line.trim_start();
    CONTINUATION_KEYWORDS.iter().any(|k| trimmed.starts_with(k))
}

/// Group type-checker lines by artifact
///
/// Continuation lines follow their header until a blank line or the next
/// header. A `Type ...`/`Its ...` line outside any diagnostic attaches to the
/// most recently seen artifact.
pub fn parse_type_errors(raw: &str) -> DiagnosticGroups {
    let mut groups = DiagnosticGroups::default();
    // Outer None: no open diagnostic. Inner None: open but unattributed.
    let mut current: Option<Option<String>> = None;
    let mut last_artifact: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            current = None;
            continue;
        }

        if let Some(file) = header_file(line) {
            let artifact = artifact_from_path(file).map(|(_, name)| name);
            groups.push(artifact.as_deref(), line.to_string());
            if artifact.is_some() {
                last_artifact = artifact.clone();
            }
            current = Some(artifact);
            continue;
        }

        match &current {
            Some(bucket) => groups.push(bucket.as_deref(), line.to_string()),
            None if is_continuation_keyword(line) => {
                if let Some(name) = &last_artifact {
                    groups.push(Some(name), line.to_string());
                }
            }
            None => {}
        }
    }

    groups
}

/// Keep header lines whose file satisfies `keep`, with their continuations
fn collect_matching(raw: &str, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let mut out = Vec::new();
    let mut open = false;
    let mut last_kept = false;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            open = false;
            continue;
        }

        if let Some(file) = header_file(line) {
            open = keep(file);
            last_kept = open;
            if open {
                out.push(line.to_string());
            }
            continue;
        }

        if open || (last_kept && is_continuation_keyword(line)) {
            out.push(line.to_string());
        }
    }

    out
}

fn normalize_path(path: &str) -> &str {
    path.trim().trim_start_matches("./").trim_end_matches('/')
}

/// Diagnostics whose file equals `path_prefix` or lies beneath it
pub fn filter_by_path(raw: &str, path_prefix: &str) -> Vec<String> {
    let prefix = normalize_path(path_prefix);
    collect_matching(raw, |file| {
        let file = normalize_path(file);
        file == prefix
            || (file.len() > prefix.len()
                && file.starts_with(prefix)
                && file.as_bytes()[prefix.len()] == b'/')
    })
}

/// Whether `file` lies at or beneath `path_prefix`, matching whole segments
///
/// `file` may be absolute (linters report absolute paths), so the prefix may
/// also start after any `/` inside it.
pub fn path_within(file: &str, path_prefix: &str) -> bool {
    let prefix = normalize_path(path_prefix).replace('\\', "/");
    if prefix.is_empty() {
        return true;
    }
    let file = file.replace('\\', "/");
    let file = normalize_path(&file);
    file == prefix
        || file.ends_with(&format!("/{}", prefix))
        || file.starts_with(&format!("{}/", prefix))
        || file.contains(&format!("/{}/", prefix))
}

/// Diagnostics whose header mentions `file_path`
pub fn extract_file_errors(raw: &str, file_path: &str) -> Vec<String> {
    let needle = normalize_path(file_path);
    collect_matching(raw, |file| file.contains(needle))
}

/// Structured diagnostics from type-checker output
pub fn parse_type_diagnostics(raw: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut open = false;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            open = false;
            continue;
        }

        if let Some(caps) = header_re().captures(line) {
            let severity = match caps.name("sev").map(|m| m.as_str()) {
                Some("warning") => Severity::Warning,
                _ => Severity::Error,
            };
            diagnostics.push(Diagnostic {
                file: caps["file"].trim().to_string(),
                line: caps["line"].parse().unwrap_or(0),
                column: caps["col"].parse().unwrap_or(0),
                message: caps["msg"].trim().to_string(),
                rule: None,
                code: caps.name("code").map(|m| m.as_str().to_string()),
                severity,
                continuation: Vec::new(),
            });
            open = true;
            continue;
        }

        if open || is_continuation_keyword(line) {
            if let Some(last) = diagnostics.last_mut() {
                last.continuation.push(line.trim().to_string());
            }
        }
    }

    diagnostics
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LintFileReport {
    file_path: String,
    #[serde(default)]
    messages: Vec<LintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LintMessage {
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
    message: String,
    #[serde(default)]
    rule_id: Option<String>,
    severity: u8,
}

/// Flatten ESLint JSON output into diagnostics
///
/// Leading non-JSON noise (package-runner banners) before the report array is skipped.
pub fn parse_lint_json(raw: &str) -> Result<Vec<Diagnostic>> {
    let trimmed = raw.trim_start();
    let json = if trimmed.starts_with('[') {
        trimmed
    } else {
        raw.find("\n[")
            .map(|i| &raw[i + 1..])
            .ok_or_else(|| KilnError::DiagnosticParse("no lint report found in output".to_string()))?
    };

    let reports: Vec<LintFileReport> = serde_json::from_str(json)
        .map_err(|e| KilnError::DiagnosticParse(format!("invalid lint JSON: {}", e)))?;

    Ok(reports
        .into_iter()
        .flat_map(|report| {
            let file = report.file_path;
            report.messages.into_iter().filter_map(move |m| {
                Some(Diagnostic {
                    file: file.clone(),
                    line: m.line.unwrap_or(0),
                    column: m.column.unwrap_or(0),
                    message: m.message,
                    rule: m.rule_id,
                    code: None,
                    severity: Severity::from_lint_level(m.severity)?,
                    continuation: Vec::new(),
                })
            })
        })
        .collect())
}

/// Group structured diagnostics by the artifact their file belongs to
pub fn group_by_artifact(diagnostics: Vec<Diagnostic>) -> Grouped<Diagnostic> {
    let mut groups = Grouped::default();
    for diagnostic in diagnostics {
        let artifact = artifact_from_path(&diagnostic.file).map(|(_, name)| name);
        groups.push(artifact.as_deref(), diagnostic);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ui/elements/Button/Button.tsx(3,5): error TS2322: Type 'string' is not assignable.\nType 'string' is not assignable to type 'number'.\n\nui/elements/Input/Input.tsx(1,1): error TS1000: x";

    #[test]
    fn test_grouping_completeness() {
        let groups = parse_type_errors(SAMPLE);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get("Button").unwrap().len(), 2);
        assert_eq!(groups.get("Input").unwrap().len(), 1);
        assert!(groups.unattributed.is_empty());
    }

    #[test]
    fn test_continuation_until_next_header() {
        let raw = "\
ui/components/Card/Card.tsx(10,3): error TS2741: Property 'title' is missing.
  Type '{}' is not assignable to type 'CardProps'.
    Its type is '{}'.
ui/components/Card/Card.tsx(12,1): error TS2304: Cannot find name 'foo'.
Found 2 errors.";
        let groups = parse_type_errors(raw);
        let card = groups.get("Card").unwrap();

        // The trailing summary line continues the second diagnostic
        assert_eq!(card.len(), 5);
        assert!(card[1].contains("is not assignable"));
    }

    #[test]
    fn test_rewrapped_keyword_attaches_to_last_artifact() {
        let raw = "\
ui/modules/Header/Header.tsx(2,2): error TS2322: Bad.

Type 'number' is not assignable to type 'string'.
Some unrelated banner";
        let groups = parse_type_errors(raw);
        let header = groups.get("Header").unwrap();
        assert_eq!(header.len(), 2);
        assert!(header[1].starts_with("Type 'number'"));
    }

    #[test]
    fn test_unattributed_bucket() {
        let raw = "\
src/lib/utils.ts(4,9): error TS7006: Parameter 'x' implicitly has an 'any' type.
  Its type is any.

ui/icons/Star/Star.tsx(1,1): error TS1005: ';' expected.";
        let groups = parse_type_errors(raw);

        assert_eq!(groups.unattributed.len(), 2);
        assert_eq!(groups.get("Star").unwrap().len(), 1);
    }

    #[test]
    fn test_artifact_from_path() {
        assert_eq!(
            artifact_from_path("ui/elements/Button/Button.tsx"),
            Some((Tier::Elements, "Button".to_string()))
        );
        assert_eq!(
            artifact_from_path("/home/dev/components/app/ui/modules/Nav/parts/Item.tsx"),
            Some((Tier::Modules, "Nav".to_string()))
        );
        assert_eq!(
            artifact_from_path("C:\\app\\ui\\icons\\Star\\Star.tsx"),
            Some((Tier::Icons, "Star".to_string()))
        );
        assert_eq!(artifact_from_path("ui/elements/Button.tsx"), None);
        assert_eq!(artifact_from_path("src/lib/utils.ts"), None);
    }

    #[test]
    fn test_filter_by_path() {
        let raw = format!(
            "{}\n\nui/elements/ButtonGroup/ButtonGroup.tsx(1,1): error TS1: y",
            SAMPLE
        );

        let button = filter_by_path(&raw, "ui/elements/Button");
        assert_eq!(button.len(), 2);
        assert!(button[0].starts_with("ui/elements/Button/Button.tsx"));

        let trailing = filter_by_path(&raw, "./ui/elements/Button/");
        assert_eq!(trailing, button);

        let elements = filter_by_path(&raw, "ui/elements");
        assert_eq!(elements.len(), 4);

        assert!(filter_by_path(&raw, "ui/modules").is_empty());
    }

    #[test]
    fn test_path_within_respects_segments() {
        assert!(path_within("ui/elements/Button/Button.tsx", "ui/elements/Button"));
        assert!(path_within("/p/ui/elements/Button/Button.tsx", "./ui/elements/Button/"));
        assert!(path_within("C:\\p\\ui\\elements\\Button\\Button.tsx", "ui/elements/Button"));
        assert!(path_within("/p/ui/elements/Button", "ui/elements/Button"));

        assert!(!path_within("/p/ui/elements/ButtonGroup/ButtonGroup.tsx", "ui/elements/Button"));
        assert!(!path_within("/p/xui/elements/Button/Button.tsx", "ui/elements/Button"));
        assert!(!path_within("ui/modules/Nav/Nav.tsx", "ui/elements"));
    }

    #[test]
    fn test_extract_file_errors() {
        let lines = extract_file_errors(SAMPLE, "Input/Input.tsx");
        assert_eq!(lines, vec!["ui/elements/Input/Input.tsx(1,1): error TS1000: x"]);

        let lines = extract_file_errors(SAMPLE, "Button.tsx");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_parse_type_diagnostics() {
        let diagnostics = parse_type_diagnostics(SAMPLE);
        assert_eq!(diagnostics.len(), 2);

        let first = &diagnostics[0];
        assert_eq!(first.file, "ui/elements/Button/Button.tsx");
        assert_eq!((first.line, first.column), (3, 5));
        assert_eq!(first.code.as_deref(), Some("TS2322"));
        assert_eq!(first.severity, Severity::Error);
        assert_eq!(first.message, "Type 'string' is not assignable.");
        assert_eq!(
            first.continuation,
            vec!["Type 'string' is not assignable to type 'number'."]
        );
        assert!(first.rule.is_none());

        assert_eq!(diagnostics[1].message, "x");
        assert!(diagnostics[1].continuation.is_empty());
    }

    #[test]
    fn test_parse_lint_json() {
        let raw = r#"[
            {"filePath": "/repo/ui/elements/Button/Button.tsx", "messages": [
                {"line": 4, "column": 2, "message": "Unexpected any.", "ruleId": "@typescript-eslint/no-explicit-any", "severity": 2},
                {"line": 9, "column": 1, "message": "Missing return type.", "ruleId": "explicit-function-return-type", "severity": 1}
            ]},
            {"filePath": "/repo/ui/components/Card/Card.tsx", "messages": []},
            {"filePath": "/repo/src/main.ts", "messages": [
                {"message": "Parsing error: Unexpected token", "ruleId": null, "severity": 2}
            ]}
        ]"#;

        let diagnostics = parse_lint_json(raw).unwrap();
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[1].severity, Severity::Warning);
        assert_eq!(
            diagnostics[0].rule.as_deref(),
            Some("@typescript-eslint/no-explicit-any")
        );
        assert!(diagnostics[2].rule.is_none());
        assert_eq!(diagnostics[2].line, 0);

        let groups = group_by_artifact(diagnostics);
        assert_eq!(groups.get("Button").unwrap().len(), 2);
        assert!(groups.get("Card").is_none());
        assert_eq!(groups.unattributed.len(), 1);
    }

    #[test]
    fn test_parse_lint_json_skips_banner() {
        let raw = "npm warn exec something\n[{\"filePath\":\"ui/icons/Star/Star.tsx\",\"messages\":[]}]";
        assert!(parse_lint_json(raw).unwrap().is_empty());
    }

    #[test]
    fn test_parse_lint_json_rejects_garbage() {
        let err = parse_lint_json("Oops! Something went wrong").unwrap_err();
        assert!(matches!(err, KilnError::DiagnosticParse(_)));
    }
}
