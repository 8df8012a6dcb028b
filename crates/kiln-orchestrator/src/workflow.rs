//! Workflow runner
//!
//! Executes phases one at a time, merges each overlay, and asks the pure
//! state machine for the next phase. Every run reaches `end`: aborts route to
//! `finalize`, and `max_iterations` forces it.

use crate::run_log::RunLog;
use crate::state::{PhaseError, StateOverlay, WorkflowState};
use crate::state_machine::{next_phase, Phase};
use kiln_agent::{
    AnthropicSynthesizer, BatchExecutor, CircuitBreaker, CodeSynthesizer, DesignSource,
    FileDesignSource, SynthesisHealth,
};
use kiln_core::{KilnConfig, Result, Tier};
use kiln_registry::artifact_dir;
use kiln_validation::{CommandToolRunner, LintChecker, TypeChecker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One design-to-code run over a project
pub struct Workflow {
    pub(crate) project_root: PathBuf,
    pub(crate) config: KilnConfig,
    pub(crate) synthesizer: Arc<dyn CodeSynthesizer>,
    pub(crate) design: Arc<dyn DesignSource>,
    pub(crate) type_checker: TypeChecker,
    pub(crate) lint_checker: Option<LintChecker>,
    pub(crate) executor: BatchExecutor,
    pub(crate) run_log: RunLog,
}

impl Workflow {
    pub fn new(
        project_root: impl Into<PathBuf>,
        config: KilnConfig,
        synthesizer: Arc<dyn CodeSynthesizer>,
        design: Arc<dyn DesignSource>,
        type_checker: TypeChecker,
    ) -> Self {
        let project_root = project_root.into();
        let executor = BatchExecutor::new(config.batch.clone())
            .with_health_check(Arc::new(SynthesisHealth(synthesizer.clone())));
        let run_log = RunLog::new(&KilnConfig::kiln_dir(&project_root));

        Self {
            project_root,
            config,
            synthesizer,
            design,
            type_checker,
            lint_checker: None,
            executor,
            run_log,
        }
    }

    /// Wire the production collaborators from configuration
    ///
    /// The design document is read from `design_path`; tools run as
    /// subprocesses in `project_root`.
    pub fn from_config(
        project_root: impl Into<PathBuf>,
        config: KilnConfig,
        design_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let project_root = project_root.into();
        config.validate()?;

        let synthesizer = AnthropicSynthesizer::from_config(&config.models);
        let breaker = synthesizer.circuit_breaker();

        let type_runner =
            CommandToolRunner::from_command_line("typecheck", &config.tools.typecheck, &project_root)?;
        let lint_checker = match &config.tools.lint {
            Some(command) => Some(LintChecker::new(Arc::new(
                CommandToolRunner::from_command_line("lint", command, &project_root)?,
            ))),
            None => None,
        };

        let mut workflow = Self::new(
            project_root,
            config,
            Arc::new(synthesizer),
            Arc::new(FileDesignSource::new(design_path)),
            TypeChecker::new(Arc::new(type_runner)),
        )
        .with_circuit_breaker(breaker);
        workflow.lint_checker = lint_checker;
        Ok(workflow)
    }

    pub fn with_lint_checker(mut self, lint_checker: LintChecker) -> Self {
        self.lint_checker = Some(lint_checker);
        self
    }

    /// Share a breaker so hard failures in one burst stop the next
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.executor = self.executor.with_circuit_breaker(breaker);
        self
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Absolute directory holding the tier directories
    pub fn output_root(&self) -> PathBuf {
        self.config.output_root(&self.project_root)
    }

    /// Artifact directory as the tools print it: relative to the project root, `/`-separated
    pub(crate) fn artifact_prefix(&self, tier: Tier, name: &str) -> String {
        let dir = artifact_dir(&self.output_root(), tier, name);
        let relative = dir.strip_prefix(&self.project_root).unwrap_or(&dir);
        relative.to_string_lossy().replace('\\', "/")
    }

    /// Run every phase until `end`
    #[instrument(skip(self), fields(root = %self.project_root.display()))]
    pub async fn run(&self) -> WorkflowState {
        let mut state = WorkflowState::new();
        let limits = &self.config.workflow;
        info!(run_id = %state.run_id, "starting workflow");
        self.run_log
            .log_run_start(state.run_id, &self.output_root())
            .await;

        let mut phase = Phase::Init;
        loop {
            state.current_phase = phase;
            state.phase_history.push(phase);
            state.iterations += 1;
            self.run_log.log_phase(phase, state.iterations).await;
            debug!(%phase, iteration = state.iterations, "entering phase");

            let overlay = self.execute(phase, &state).await;
            self.run_log.log_errors(&overlay.errors).await;
            state = state.merge(overlay);

            let next = if state.iterations >= limits.max_iterations && !phase.is_closing() {
                warn!(
                    max_iterations = limits.max_iterations,
                    %phase,
                    "iteration cap reached, forcing finalize"
                );
                let cap = PhaseError::new(
                    phase,
                    format!("iteration cap of {} reached", limits.max_iterations),
                );
                self.run_log.log_errors(std::slice::from_ref(&cap)).await;
                state = state.merge(StateOverlay::default().with_errors([cap]));
                Some(Phase::Finalize)
            } else {
                next_phase(phase, &state, limits)
            };

            match next {
                Some(next) => phase = next,
                None => break,
            }
        }

        info!(
            run_id = %state.run_id,
            success = state.success,
            iterations = state.iterations,
            errors = state.errors.len(),
            "workflow finished"
        );
        state
    }

    async fn execute(&self, phase: Phase, state: &WorkflowState) -> StateOverlay {
        match phase {
            Phase::Init | Phase::End => StateOverlay::default(),
            Phase::Analyze => self.analyze().await,
            Phase::Setup => self.setup().await,
            Phase::Generate => self.generate(state).await,
            Phase::GenerateStories => self.generate_stories(state).await,
            Phase::Validate => self.validate(state).await,
            Phase::TypescriptFix => self.typescript_fix(state).await,
            Phase::QualityReview => self.quality_review(state).await,
            Phase::FinalCheck => self.final_check(state).await,
            Phase::DecideNext => self.decide_next(state).await,
            Phase::Finalize => self.finalize(state).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_agent::{MockSynthesizer, StaticDesignSource};
    use kiln_core::{ComponentSpec, DesignSpec};
    use kiln_validation::{MockToolRunner, ToolOutput};
    use tempfile::TempDir;

    fn workflow(root: &Path, config: KilnConfig) -> Workflow {
        let design = DesignSpec {
            name: "Test".to_string(),
            components: vec![ComponentSpec {
                name: "Button".to_string(),
                tier: Tier::Elements,
                description: String::new(),
            }],
            tokens: serde_json::Value::Null,
        };
        Workflow::new(
            root,
            config,
            Arc::new(MockSynthesizer::new()),
            Arc::new(StaticDesignSource::new(design)),
            TypeChecker::new(Arc::new(
                MockToolRunner::new().with_response(None, ToolOutput::clean()),
            )),
        )
    }

    #[test]
    fn test_artifact_prefix_is_relative() {
        let temp_dir = TempDir::new().unwrap();
        let wf = workflow(temp_dir.path(), KilnConfig::default());
        assert_eq!(wf.artifact_prefix(Tier::Modules, "Header"), "ui/modules/Header");
    }

    #[tokio::test]
    async fn test_iteration_cap_forces_finalize() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = KilnConfig::default();
        config.workflow.max_iterations = 2;

        let state = workflow(temp_dir.path(), config).run().await;

        assert_eq!(
            state.phase_history,
            vec![Phase::Init, Phase::Analyze, Phase::Finalize, Phase::End]
        );
        assert!(state.workflow_completed);
        assert!(!state.success);
        assert!(state.errors[0].message.contains("iteration cap of 2"));
    }

    #[tokio::test]
    async fn test_from_config_wires_tools() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = KilnConfig::default();
        config.tools.lint = None;

        let wf = Workflow::from_config(temp_dir.path(), config, temp_dir.path().join("design.json"))
            .unwrap();
        assert!(wf.lint_checker.is_none());

        let mut broken = KilnConfig::default();
        broken.tools.typecheck = "   ".to_string();
        assert!(Workflow::from_config(temp_dir.path(), broken, "design.json").is_err());
    }
}
