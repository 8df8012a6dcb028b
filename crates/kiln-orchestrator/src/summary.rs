//! User-facing run summary

use crate::state::WorkflowState;
use crate::state_machine::Phase;
use chrono::{DateTime, Utc};
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SUMMARY_FILE: &str = "run-summary.json";

/// An artifact still failing at the end of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedArtifact {
    pub name: String,
    pub fix_attempts: u32,
    pub type_errors: usize,
    pub lint_issues: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub success: bool,
    pub aborted: bool,
    /// Last working phase before `finalize`
    pub final_phase: Phase,
    pub total_components_generated: usize,
    pub generated_this_run: usize,
    pub stories_generated: usize,
    pub story_generation_error: Option<String>,
    pub validated: Vec<String>,
    pub unresolved: Vec<UnresolvedArtifact>,
    /// Design components with no artifact on disk
    pub missing: Vec<String>,
    pub final_check_attempts: u32,
    pub final_check_passed: bool,
    pub iterations: u32,
    pub error_count: usize,
    pub errors_by_phase: BTreeMap<Phase, Vec<String>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Summarize a state that has reached `finalize`
    pub fn from_state(state: &WorkflowState) -> Self {
        let finished_at = Utc::now();
        let total_components_generated = state.registry.as_ref().map_or(0, |r| r.len());

        let final_phase = state
            .phase_history
            .iter()
            .rev()
            .find(|p| !p.is_closing())
            .copied()
            .unwrap_or(Phase::Init);

        let unresolved = state
            .failed_components
            .values()
            .map(|r| UnresolvedArtifact {
                name: r.component_name.clone(),
                fix_attempts: r.fix_attempts,
                type_errors: r.errors.len(),
                lint_issues: r.issues.len(),
            })
            .collect();

        let missing: Vec<String> = state
            .design_spec
            .iter()
            .flat_map(|spec| &spec.components)
            .filter(|c| {
                state
                    .registry
                    .as_ref()
                    .map_or(true, |r| r.find_by_name(&c.name).is_none())
            })
            .map(|c| c.name.clone())
            .collect();

        let mut errors_by_phase: BTreeMap<Phase, Vec<String>> = BTreeMap::new();
        for error in &state.errors {
            errors_by_phase
                .entry(error.phase)
                .or_default()
                .push(error.message.clone());
        }

        let success = !state.aborted
            && state.final_check_passed
            && state.failed_components.is_empty()
            && missing.is_empty()
            && total_components_generated > 0;

        Self {
            run_id: state.run_id,
            success,
            aborted: state.aborted,
            final_phase,
            total_components_generated,
            generated_this_run: state.generated.len(),
            stories_generated: state.stories_generated.len(),
            story_generation_error: state.story_generation_error.clone(),
            validated: state.validated_components.clone(),
            unresolved,
            missing,
            final_check_attempts: state.final_check_attempts,
            final_check_passed: state.final_check_passed,
            iterations: state.iterations,
            error_count: state.errors.len(),
            errors_by_phase,
            started_at: state.started_at,
            finished_at,
            elapsed_ms: (finished_at - state.started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Write as pretty JSON into `kiln_dir`
    pub async fn write(&self, kiln_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(kiln_dir).await?;
        let path = kiln_dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }

    pub async fn read(kiln_dir: &Path) -> Result<Self> {
        let path = kiln_dir.join(SUMMARY_FILE);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::Other(format!("No run summary at {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Plain-text report for terminals
    pub fn render(&self) -> String {
        let mut out = String::new();
        let status = if self.success {
            "SUCCESS"
        } else if self.aborted {
            "ABORTED"
        } else {
            "INCOMPLETE"
        };

        out.push_str(&format!("Run {} - {}\n", self.run_id, status));
        out.push_str(&format!(
            "  Last phase: {}  |  Iterations: {}  |  Elapsed: {:.1}s\n",
            self.final_phase,
            self.iterations,
            self.elapsed_ms as f64 / 1000.0
        ));
        out.push_str(&format!(
            "  Artifacts: {} total, {} generated this run, {} stories\n",
            self.total_components_generated, self.generated_this_run, self.stories_generated
        ));
        out.push_str(&format!(
            "  Final check: {} after {} attempt(s)\n",
            if self.final_check_passed { "passed" } else { "failed" },
            self.final_check_attempts
        ));

        if let Some(error) = &self.story_generation_error {
            out.push_str(&format!("  Stories: {}\n", error));
        }

        if !self.unresolved.is_empty() {
            out.push_str(&format!("\nUnresolved ({}):\n", self.unresolved.len()));
            for artifact in &self.unresolved {
                out.push_str(&format!(
                    "  - {} ({} type errors, {} lint issues, {} fix attempts)\n",
                    artifact.name, artifact.type_errors, artifact.lint_issues, artifact.fix_attempts
                ));
            }
        }

        if !self.missing.is_empty() {
            out.push_str(&format!("\nNot generated: {}\n", self.missing.join(", ")));
        }

        if self.error_count > 0 {
            out.push_str(&format!("\nErrors ({}):\n", self.error_count));
            for (phase, messages) in &self.errors_by_phase {
                out.push_str(&format!("  {}:\n", phase));
                for message in messages {
                    out.push_str(&format!("    - {}\n", message));
                }
            }
        }

        out
    }
}
