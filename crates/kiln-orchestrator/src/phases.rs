//! Phase implementations
//!
//! Each phase reads the merged state and returns a [`StateOverlay`]. Phases
//! that update the failure ledger work on a local copy through the tracker
//! functions and hand back the tracker fields with [`StateOverlay::tracking`].

use crate::state::{PhaseError, StateOverlay, WorkflowState};
use crate::state_machine::{decide_route, Phase};
use crate::summary::RunSummary;
use crate::tracker::{record_failure, record_fix_attempt, resolve};
use crate::workflow::Workflow;
use chrono::Utc;
use kiln_agent::{AvailableImport, BatchJob, BatchOutcome, GenerationContext};
use kiln_core::fail_open::fail_open_with_retries;
use kiln_core::{
    ArtifactCheck, ArtifactRecord, ComponentSpec, Diagnostic, FailureRecord, FixRequest,
    KilnConfig, KilnError, QualityResult, Result, Tier, ValidationResult,
};
use kiln_registry::{
    artifact_path, check_tier_ordering, import_path, story_path, ArtifactRegistry,
};
use kiln_validation::{filter_by_path, Grouped};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one round of repair requests
struct RepairRound {
    /// Every artifact a repair was requested for
    attempted: Vec<String>,
    /// Artifacts whose repaired source was written
    written: Vec<String>,
    errors: Vec<PhaseError>,
    /// The executor fell back; no further rounds this visit
    halted: bool,
}

impl Workflow {
    pub(crate) async fn analyze(&self) -> StateOverlay {
        let phase = Phase::Analyze;
        let mut spec = match self.design.fetch_spec().await {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "design source failed");
                return StateOverlay::abort(phase, e.to_string());
            }
        };

        if spec.components.is_empty() {
            return StateOverlay::abort(phase, "design spec contains no components");
        }

        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        spec.components.retain(|c| {
            let fresh = seen.insert(c.name.clone());
            if !fresh {
                errors.push(PhaseError::new(
                    phase,
                    format!("duplicate component {} ignored", c.name),
                ));
            }
            fresh
        });

        info!(
            design = %spec.name,
            components = spec.components.len(),
            "design spec analyzed"
        );

        StateOverlay {
            design_spec: Some(spec),
            ..StateOverlay::default()
        }
        .with_errors(errors)
    }

    pub(crate) async fn setup(&self) -> StateOverlay {
        let root = self.output_root();
        for tier in Tier::ALL {
            let dir = root.join(tier.dir_name());
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                return StateOverlay::abort(
                    Phase::Setup,
                    format!("cannot create {}: {}", dir.display(), e),
                );
            }
        }

        let registry = ArtifactRegistry::build(&root);
        info!(root = %root.display(), existing = registry.len(), "output tree ready");

        StateOverlay {
            registry: Some(registry),
            ..StateOverlay::default()
        }
    }

    /// Generate missing artifacts tier by tier, dependencies first
    pub(crate) async fn generate(&self, state: &WorkflowState) -> StateOverlay {
        let phase = Phase::Generate;
        let Some(spec) = state.design_spec.as_ref() else {
            return StateOverlay::abort(phase, "no design spec to generate from");
        };

        let root = self.output_root();
        let mut registry = state
            .registry
            .clone()
            .unwrap_or_else(|| ArtifactRegistry::build(&root));
        let mut generated = Vec::new();
        let mut errors = Vec::new();

        for tier in Tier::GENERATION_ORDER {
            let jobs: Vec<BatchJob<ComponentSpec>> = spec
                .components
                .iter()
                .filter(|c| c.tier == tier)
                .filter(|c| {
                    let exists = registry
                        .get_by_tier(tier)
                        .iter()
                        .any(|r| r.name == c.name);
                    if exists {
                        debug!(name = %c.name, %tier, "artifact already present, skipping");
                    }
                    !exists
                })
                .map(|c| BatchJob::new(c.name.clone(), c.name.clone(), c.clone()))
                .collect();

            if jobs.is_empty() {
                continue;
            }

            let context = GenerationContext {
                design_name: spec.name.clone(),
                tokens: spec.tokens.clone(),
                available: registry
                    .get_all()
                    .into_iter()
                    .filter(|r| tier.may_reference(r.tier))
                    .map(|r| AvailableImport {
                        name: r.name.clone(),
                        tier: r.tier,
                        import_path: import_path(r.tier, &r.name),
                    })
                    .collect(),
            };

            info!(%tier, count = jobs.len(), "generating tier");
            let synthesizer = &self.synthesizer;
            let context = &context;
            let outcome = self
                .executor
                .run(
                    jobs,
                    |component: ComponentSpec| async move {
                        synthesizer.generate(&component, context).await
                    },
                    |progress| {
                        debug!(%tier, percent = progress.percent, "generation progress");
                    },
                )
                .await;

            let report = match outcome {
                BatchOutcome::Completed(report) => report,
                BatchOutcome::Fallback { reason } => {
                    errors.push(PhaseError::new(
                        phase,
                        format!("generation skipped from tier {}: {}", tier, reason),
                    ));
                    break;
                }
            };

            for failure in report.errors {
                errors.push(PhaseError::new(
                    phase,
                    format!(
                        "{} failed after {} attempt(s): {}",
                        failure.name, failure.attempts, failure.error
                    ),
                ));
            }

            for artifact in report.results.into_values() {
                let path = artifact_path(&root, artifact.tier, &artifact.name);
                let written = write_source(&path, &artifact.code).await;
                match written {
                    Ok(()) => {
                        registry.upsert(ArtifactRecord {
                            name: artifact.name.clone(),
                            tier: artifact.tier,
                            path,
                            added_at: Utc::now(),
                        });
                        generated.push(artifact.name);
                    }
                    Err(e) => errors.push(PhaseError::new(
                        phase,
                        format!("cannot write {}: {}", artifact.name, e),
                    )),
                }
            }
        }

        // The filesystem is the source of truth
        let registry = ArtifactRegistry::build(&root);
        for violation in check_tier_ordering(&registry) {
            warn!(%violation, "tier ordering violated");
            errors.push(PhaseError::new(phase, violation.to_string()));
        }

        info!(generated = generated.len(), total = registry.len(), "generation complete");
        StateOverlay {
            registry: Some(registry),
            generated: Some(generated),
            ..StateOverlay::default()
        }
        .with_errors(errors)
    }

    /// Write a story for every artifact that lacks one; failures are non-fatal
    pub(crate) async fn generate_stories(&self, state: &WorkflowState) -> StateOverlay {
        let Some(registry) = state.registry.as_ref() else {
            return StateOverlay::default();
        };

        let mut jobs = Vec::new();
        for record in registry.get_all() {
            if story_path(registry.root(), record.tier, &record.name).exists() {
                continue;
            }
            match tokio::fs::read_to_string(&record.path).await {
                Ok(code) => jobs.push(BatchJob::new(
                    record.name.clone(),
                    record.name.clone(),
                    (record.clone(), code),
                )),
                Err(e) => warn!(name = %record.name, error = %e, "cannot read artifact for story"),
            }
        }

        if jobs.is_empty() {
            return StateOverlay::default();
        }

        let synthesizer = &self.synthesizer;
        let outcome = self
            .executor
            .run(
                jobs,
                |(record, code): (ArtifactRecord, String)| async move {
                    let story = synthesizer.generate_story(&record, &code).await?;
                    Ok::<_, KilnError>((record, story))
                },
                |_| {},
            )
            .await;

        let report = match outcome {
            BatchOutcome::Completed(report) => report,
            BatchOutcome::Fallback { reason } => {
                warn!(%reason, "story generation skipped");
                return StateOverlay {
                    story_generation_error: Some(reason),
                    ..StateOverlay::default()
                };
            }
        };

        let mut failures: Vec<String> = report
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.name, e.error))
            .collect();
        let mut written = state.stories_generated.clone();

        for (record, story) in report.results.into_values() {
            let path = story_path(registry.root(), record.tier, &record.name);
            match write_source(&path, &story).await {
                Ok(()) => written.push(record.name),
                Err(e) => failures.push(format!("{}: {}", record.name, e)),
            }
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "some stories could not be generated");
        }

        StateOverlay {
            stories_generated: Some(written),
            story_generation_error: (!failures.is_empty()).then(|| failures.join("; ")),
            ..StateOverlay::default()
        }
    }

    /// Type-check the tree and partition artifacts into passing and failing
    pub(crate) async fn validate(&self, state: &WorkflowState) -> StateOverlay {
        let phase = Phase::Validate;
        let Some(registry) = state.registry.as_ref() else {
            return StateOverlay::abort(phase, "registry not built");
        };

        let report = match self.type_checker.check_tree().await {
            Ok(report) => report,
            Err(e) => return StateOverlay::abort(phase, e.to_string()),
        };

        let mut local = state.clone();
        let mut errors = unattributed_errors(phase, &report.result.unattributed);

        for record in registry.get_all() {
            let lines = report.lines.get(&record.name).unwrap_or_default();
            let diagnostics = report.issues.get(&record.name).unwrap_or_default().to_vec();

            if lines.is_empty() {
                local
                    .validation_results
                    .insert(record.name.clone(), ArtifactCheck::Type(ValidationResult::passed("")));
                local = resolve(local, &record.name);
            } else {
                local.validation_results.insert(
                    record.name.clone(),
                    ArtifactCheck::Type(ValidationResult::from_diagnostics(
                        diagnostics,
                        lines.join("\n"),
                    )),
                );
                local = record_failure(
                    local,
                    FailureRecord::new(&record.name, &record.path).with_errors(lines.to_vec()),
                );
            }
        }

        errors.extend(unknown_artifacts(phase, registry, report.lines.names()));

        info!(
            passed = local.validated_components.len(),
            failed = local.failed_components.len(),
            "validation complete"
        );
        StateOverlay::tracking(&local).with_errors(errors)
    }

    /// Bounded repair loop for type errors
    pub(crate) async fn typescript_fix(&self, state: &WorkflowState) -> StateOverlay {
        let phase = Phase::TypescriptFix;
        let Some(registry) = state.registry.as_ref() else {
            return StateOverlay::default();
        };
        let limits = &self.config.workflow;
        let mut local = state.clone();
        let mut errors = Vec::new();

        for pass in 1..=limits.fix_attempts_per_pass {
            let candidates: Vec<FailureRecord> = local
                .failed_components
                .values()
                .filter(|r| !r.errors.is_empty() && r.fix_attempts < limits.max_fix_attempts)
                .cloned()
                .collect();
            if candidates.is_empty() {
                break;
            }

            info!(pass, count = candidates.len(), "repairing type errors");
            let round = self.request_repairs(phase, registry, candidates, |r| r.errors.clone()).await;
            errors.extend(round.errors);
            for name in &round.attempted {
                local = record_fix_attempt(local, name);
            }
            if round.halted {
                break;
            }

            for name in &round.written {
                let Some(record) = registry.find_by_name(name) else {
                    continue;
                };
                let prefix = self.artifact_prefix(record.tier, name);
                match self.type_checker.check_path(&prefix).await {
                    Ok(result) if result.valid => {
                        debug!(%name, "type errors resolved");
                        local
                            .validation_results
                            .insert(name.clone(), ArtifactCheck::Type(result));
                        local = resolve(local, name);
                    }
                    Ok(result) => {
                        let lines = failure_lines(&result, &prefix);
                        local
                            .validation_results
                            .insert(name.clone(), ArtifactCheck::Type(result));
                        local = record_failure(
                            local,
                            FailureRecord::new(name, &record.path).with_errors(lines),
                        );
                    }
                    Err(e) => errors.push(PhaseError::new(
                        phase,
                        format!("re-check of {} failed: {}", name, e),
                    )),
                }
            }
        }

        StateOverlay::tracking(&local).with_errors(errors)
    }

    /// Lint every type-clean artifact and repair lint errors
    pub(crate) async fn quality_review(&self, state: &WorkflowState) -> StateOverlay {
        let phase = Phase::QualityReview;
        let (Some(lint), Some(registry)) = (self.lint_checker.as_ref(), state.registry.as_ref())
        else {
            debug!("no lint tool configured, skipping quality review");
            return StateOverlay::default();
        };

        let groups = match lint.lint_tree().await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "lint run failed, continuing without quality review");
                return StateOverlay::default().with_error(phase, format!("lint unavailable: {}", e));
            }
        };

        let limits = &self.config.workflow;
        let mut local = state.clone();
        let mut errors = Vec::new();

        for record in registry.get_all() {
            if has_type_errors(&local, &record.name) {
                continue;
            }
            let quality = QualityResult::from_issues(
                groups.get(&record.name).unwrap_or_default().to_vec(),
            );
            let lint_errors = error_issues(&quality.issues);
            local
                .validation_results
                .insert(record.name.clone(), ArtifactCheck::Quality(quality));

            if lint_errors.is_empty() {
                local = resolve(local, &record.name);
            } else {
                local = record_failure(
                    local,
                    FailureRecord::new(&record.name, &record.path).with_issues(lint_errors),
                );
            }
        }

        for pass in 1..=limits.fix_attempts_per_pass {
            let candidates: Vec<FailureRecord> = local
                .failed_components
                .values()
                .filter(|r| r.errors.is_empty() && !r.issues.is_empty())
                .filter(|r| r.fix_attempts < limits.max_fix_attempts)
                .cloned()
                .collect();
            if candidates.is_empty() {
                break;
            }

            info!(pass, count = candidates.len(), "repairing lint errors");
            let round = self
                .request_repairs(phase, registry, candidates, |r| {
                    r.issues.iter().map(Diagnostic::render).collect()
                })
                .await;
            errors.extend(round.errors);
            for name in &round.attempted {
                local = record_fix_attempt(local, name);
            }
            if round.halted {
                break;
            }

            for name in &round.written {
                let Some(record) = registry.find_by_name(name) else {
                    continue;
                };
                match lint.lint_path(&self.artifact_prefix(record.tier, name)).await {
                    Ok(quality) => {
                        let lint_errors = error_issues(&quality.issues);
                        local
                            .validation_results
                            .insert(name.clone(), ArtifactCheck::Quality(quality));
                        local = if lint_errors.is_empty() {
                            resolve(local, name)
                        } else {
                            record_failure(
                                local,
                                FailureRecord::new(name, &record.path).with_issues(lint_errors),
                            )
                        };
                    }
                    Err(e) => {
                        warn!(%name, error = %e, "lint re-check failed");
                        errors.push(PhaseError::new(
                            phase,
                            format!("lint re-check of {} failed: {}", name, e),
                        ));
                    }
                }
            }
        }

        StateOverlay::tracking(&local).with_errors(errors)
    }

    /// Re-validate the whole tree: type check plus lint errors
    pub(crate) async fn final_check(&self, state: &WorkflowState) -> StateOverlay {
        let phase = Phase::FinalCheck;
        let attempts = state.final_check_attempts + 1;
        let Some(registry) = state.registry.as_ref() else {
            return StateOverlay::abort(phase, "registry not built");
        };

        let report = match self.type_checker.check_tree().await {
            Ok(report) => report,
            Err(e) => {
                let mut overlay = StateOverlay::abort(phase, e.to_string());
                overlay.final_check_attempts = Some(attempts);
                overlay.final_check_passed = Some(false);
                return overlay;
            }
        };

        let mut errors = unattributed_errors(phase, &report.result.unattributed);
        let lint_groups = match &self.lint_checker {
            Some(lint) => match lint.lint_tree().await {
                Ok(groups) => groups,
                Err(e) => {
                    warn!(error = %e, "lint run failed during final check");
                    errors.push(PhaseError::new(phase, format!("lint unavailable: {}", e)));
                    Grouped::default()
                }
            },
            None => Grouped::default(),
        };

        let mut local = state.clone();
        let mut lint_error_count = 0;
        for record in registry.get_all() {
            let lines = report.lines.get(&record.name).unwrap_or_default().to_vec();
            let lint_errors = error_issues(lint_groups.get(&record.name).unwrap_or_default());
            lint_error_count += lint_errors.len();

            if lines.is_empty() && lint_errors.is_empty() {
                local = resolve(local, &record.name);
            } else {
                local = record_failure(
                    local,
                    FailureRecord::new(&record.name, &record.path)
                        .with_errors(lines)
                        .with_issues(lint_errors),
                );
            }
        }
        errors.extend(unknown_artifacts(phase, registry, report.lines.names()));

        let passed = report.passed() && lint_error_count == 0 && local.failed_components.is_empty();
        info!(attempt = attempts, passed, failing = local.failed_components.len(), "final check");

        let mut overlay = StateOverlay::tracking(&local).with_errors(errors);
        overlay.final_check_attempts = Some(attempts);
        overlay.final_check_passed = Some(passed);
        overlay
    }

    pub(crate) async fn decide_next(&self, state: &WorkflowState) -> StateOverlay {
        let route = decide_route(state, &self.config.workflow);
        info!(
            ?route,
            attempts = state.final_check_attempts,
            failing = state.failed_components.len(),
            "routing"
        );
        self.run_log
            .log_route(route, state.final_check_attempts, state.failed_components.len())
            .await;
        StateOverlay::default()
    }

    pub(crate) async fn finalize(&self, state: &WorkflowState) -> StateOverlay {
        let summary = RunSummary::from_state(state);
        let kiln_dir = KilnConfig::kiln_dir(&self.project_root);

        let written = fail_open_with_retries(
            "workflow::write_summary",
            || summary.write(&kiln_dir),
            3,
            Duration::from_millis(50),
        )
        .await;
        if let Some(path) = written {
            debug!(path = %path.display(), "run summary written");
        }
        self.run_log.log_summary(&summary).await;

        StateOverlay {
            success: Some(summary.success),
            workflow_completed: Some(true),
            summary: Some(summary),
            ..StateOverlay::default()
        }
    }

    /// Request repairs for `candidates` and write the returned sources
    async fn request_repairs(
        &self,
        phase: Phase,
        registry: &ArtifactRegistry,
        candidates: Vec<FailureRecord>,
        diagnostics_of: impl Fn(&FailureRecord) -> Vec<String>,
    ) -> RepairRound {
        let mut round = RepairRound {
            attempted: Vec::new(),
            written: Vec::new(),
            errors: Vec::new(),
            halted: false,
        };

        let mut jobs = Vec::new();
        for record in &candidates {
            let name = &record.component_name;
            let Some(artifact) = registry.find_by_name(name) else {
                continue;
            };
            round.attempted.push(name.clone());
            match tokio::fs::read_to_string(&artifact.path).await {
                Ok(code) => jobs.push(BatchJob::new(
                    name.clone(),
                    name.clone(),
                    FixRequest {
                        name: name.clone(),
                        tier: artifact.tier,
                        code,
                        diagnostics: diagnostics_of(record),
                    },
                )),
                Err(e) => round
                    .errors
                    .push(PhaseError::new(phase, format!("cannot read {}: {}", name, e))),
            }
        }

        if jobs.is_empty() {
            return round;
        }

        let synthesizer = &self.synthesizer;
        let outcome = self
            .executor
            .run(
                jobs,
                |request: FixRequest| async move {
                    let code = synthesizer.fix(&request).await?;
                    Ok::<_, KilnError>((request, code))
                },
                |_| {},
            )
            .await;

        let report = match outcome {
            BatchOutcome::Completed(report) => report,
            BatchOutcome::Fallback { reason } => {
                round
                    .errors
                    .push(PhaseError::new(phase, format!("repairs skipped: {}", reason)));
                round.halted = true;
                return round;
            }
        };

        for failure in report.errors {
            round.errors.push(PhaseError::new(
                phase,
                format!("repair of {} failed: {}", failure.name, failure.error),
            ));
        }

        for (request, code) in report.results.into_values() {
            let Some(artifact) = registry.find_by_name(&request.name) else {
                continue;
            };
            match write_source(&artifact.path, &code).await {
                Ok(()) => round.written.push(request.name),
                Err(e) => round.errors.push(PhaseError::new(
                    phase,
                    format!("cannot write {}: {}", request.name, e),
                )),
            }
        }

        round
    }
}

async fn write_source(path: &Path, code: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, code).await?;
    Ok(())
}

fn has_type_errors(state: &WorkflowState, name: &str) -> bool {
    state
        .failed_components
        .get(name)
        .is_some_and(|r| !r.errors.is_empty())
}

fn error_issues(issues: &[Diagnostic]) -> Vec<Diagnostic> {
    issues.iter().filter(|d| d.is_error()).cloned().collect()
}

/// Diagnostic lines for one artifact from a path-scoped check
fn failure_lines(result: &ValidationResult, prefix: &str) -> Vec<String> {
    let lines = filter_by_path(&result.raw_output, prefix);
    if !lines.is_empty() {
        return lines;
    }
    if !result.diagnostics.is_empty() {
        return result.diagnostics.iter().map(Diagnostic::render).collect();
    }
    result.unattributed.clone()
}

fn unattributed_errors(phase: Phase, lines: &[String]) -> Vec<PhaseError> {
    lines
        .iter()
        .map(|line| PhaseError::new(phase, format!("unattributed diagnostic: {}", line)))
        .collect()
}

/// Diagnostics attributed to artifacts the registry does not know
fn unknown_artifacts<'a>(
    phase: Phase,
    registry: &ArtifactRegistry,
    names: impl Iterator<Item = &'a str>,
) -> Vec<PhaseError> {
    names
        .filter(|name| registry.find_by_name(name).is_none())
        .map(|name| PhaseError::new(phase, format!("diagnostics for unknown artifact {}", name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Severity;

    fn diagnostic(severity: Severity) -> Diagnostic {
        Diagnostic {
            file: "ui/elements/Button/Button.tsx".to_string(),
            line: 1,
            column: 1,
            message: "m".to_string(),
            rule: Some("r".to_string()),
            code: None,
            severity,
            continuation: vec![],
        }
    }

    #[test]
    fn test_error_issues_drops_warnings() {
        let issues = vec![diagnostic(Severity::Warning), diagnostic(Severity::Error)];
        assert_eq!(error_issues(&issues).len(), 1);
    }

    #[test]
    fn test_failure_lines_fallbacks() {
        let raw = "ui/elements/Button/Button.tsx(2,3): error TS2322: bad\nui/elements/Card/Card.tsx(1,1): error TS1: x";
        let mut result = ValidationResult::from_diagnostics(vec![], raw);
        assert_eq!(
            failure_lines(&result, "ui/elements/Button"),
            vec!["ui/elements/Button/Button.tsx(2,3): error TS2322: bad"]
        );

        result.raw_output = "garbage".to_string();
        result.unattributed = vec!["garbage".to_string()];
        assert_eq!(failure_lines(&result, "ui/elements/Button"), vec!["garbage"]);
    }

    #[test]
    fn test_unknown_artifacts() {
        let registry = ArtifactRegistry::new("/tmp/ui");
        let errors = unknown_artifacts(Phase::Validate, &registry, ["Ghost"].into_iter());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Ghost"));
    }
}
