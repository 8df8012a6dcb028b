//! Workflow state threaded through every phase
//!
//! Phases never mutate the state they are given. Each returns a
//! [`StateOverlay`]; the runner merges it with [`WorkflowState::merge`].

use crate::state_machine::Phase;
use crate::summary::RunSummary;
use chrono::{DateTime, Utc};
use kiln_core::{ArtifactCheck, DesignSpec, FailureRecord};
use kiln_registry::ArtifactRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Entry in the append-only error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
}

impl PhaseError {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PhaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub current_phase: Phase,
    pub design_spec: Option<DesignSpec>,
    /// `None` until `setup` has run
    pub registry: Option<ArtifactRegistry>,
    /// Artifacts written by `generate` in this run
    pub generated: Vec<String>,
    pub failed_components: BTreeMap<String, FailureRecord>,
    pub validated_components: Vec<String>,
    /// Latest check per artifact
    pub validation_results: BTreeMap<String, ArtifactCheck>,
    pub stories_generated: Vec<String>,
    pub story_generation_error: Option<String>,
    pub final_check_attempts: u32,
    pub final_check_passed: bool,
    /// Phases executed so far
    pub iterations: u32,
    pub errors: Vec<PhaseError>,
    pub aborted: bool,
    pub success: bool,
    pub workflow_completed: bool,
    pub phase_history: Vec<Phase>,
    pub summary: Option<RunSummary>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            current_phase: Phase::Init,
            design_spec: None,
            registry: None,
            generated: Vec::new(),
            failed_components: BTreeMap::new(),
            validated_components: Vec::new(),
            validation_results: BTreeMap::new(),
            stories_generated: Vec::new(),
            story_generation_error: None,
            final_check_attempts: 0,
            final_check_passed: false,
            iterations: 0,
            errors: Vec::new(),
            aborted: false,
            success: false,
            workflow_completed: false,
            phase_history: Vec::new(),
            summary: None,
        }
    }

    /// Apply a phase overlay: set fields replace, `errors` append
    pub fn merge(mut self, overlay: StateOverlay) -> Self {
        if let Some(spec) = overlay.design_spec {
            self.design_spec = Some(spec);
        }
        if let Some(registry) = overlay.registry {
            self.registry = Some(registry);
        }
        if let Some(generated) = overlay.generated {
            self.generated = generated;
        }
        if let Some(failed) = overlay.failed_components {
            self.failed_components = failed;
        }
        if let Some(validated) = overlay.validated_components {
            self.validated_components = validated;
        }
        if let Some(results) = overlay.validation_results {
            self.validation_results = results;
        }
        if let Some(stories) = overlay.stories_generated {
            self.stories_generated = stories;
        }
        if let Some(error) = overlay.story_generation_error {
            self.story_generation_error = Some(error);
        }
        if let Some(attempts) = overlay.final_check_attempts {
            self.final_check_attempts = attempts;
        }
        if let Some(passed) = overlay.final_check_passed {
            self.final_check_passed = passed;
        }
        if let Some(aborted) = overlay.aborted {
            self.aborted = aborted;
        }
        if let Some(success) = overlay.success {
            self.success = success;
        }
        if let Some(completed) = overlay.workflow_completed {
            self.workflow_completed = completed;
        }
        if let Some(summary) = overlay.summary {
            self.summary = Some(summary);
        }
        self.errors.extend(overlay.errors);
        self
    }

    /// Errors recorded by one phase
    pub fn errors_in(&self, phase: Phase) -> impl Iterator<Item = &PhaseError> {
        self.errors.iter().filter(move |e| e.phase == phase)
    }

    /// Number of times `phase` has run
    pub fn visits(&self, phase: Phase) -> usize {
        self.phase_history.iter().filter(|p| **p == phase).count()
    }
}

/// Partial state produced by one phase
#[derive(Debug, Clone, Default)]
pub struct StateOverlay {
    pub design_spec: Option<DesignSpec>,
    pub registry: Option<ArtifactRegistry>,
    pub generated: Option<Vec<String>>,
    pub failed_components: Option<BTreeMap<String, FailureRecord>>,
    pub validated_components: Option<Vec<String>>,
    pub validation_results: Option<BTreeMap<String, ArtifactCheck>>,
    pub stories_generated: Option<Vec<String>>,
    pub story_generation_error: Option<String>,
    pub final_check_attempts: Option<u32>,
    pub final_check_passed: Option<bool>,
    pub errors: Vec<PhaseError>,
    pub aborted: Option<bool>,
    pub success: Option<bool>,
    pub workflow_completed: Option<bool>,
    pub summary: Option<RunSummary>,
}

impl StateOverlay {
    /// Overlay that records one error and aborts the run
    pub fn abort(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            errors: vec![PhaseError::new(phase, message)],
            aborted: Some(true),
            success: Some(false),
            ..Self::default()
        }
    }

    /// Overlay carrying the tracker fields of a locally updated state
    pub fn tracking(state: &WorkflowState) -> Self {
        Self {
            failed_components: Some(state.failed_components.clone()),
            validated_components: Some(state.validated_components.clone()),
            validation_results: Some(state.validation_results.clone()),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, phase: Phase, message: impl Into<String>) -> Self {
        self.errors.push(PhaseError::new(phase, message));
        self
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = PhaseError>) -> Self {
        self.errors.extend(errors);
        self
    }
}
