//! Pure phase-transition logic for the workflow
//!
//! No I/O and no async: given the phase that just ran and the merged state,
//! [`next_phase`] says where to go. The runner in `workflow.rs` performs the
//! side effects.

use crate::state::WorkflowState;
use kiln_core::WorkflowLimits;
use serde::{Deserialize, Serialize};

/// Workflow phases, in nominal execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Analyze,
    Setup,
    Generate,
    GenerateStories,
    Validate,
    TypescriptFix,
    QualityReview,
    FinalCheck,
    DecideNext,
    Finalize,
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Analyze => "analyze",
            Self::Setup => "setup",
            Self::Generate => "generate",
            Self::GenerateStories => "generate_stories",
            Self::Validate => "validate",
            Self::TypescriptFix => "typescript_fix",
            Self::QualityReview => "quality_review",
            Self::FinalCheck => "final_check",
            Self::DecideNext => "decide_next",
            Self::Finalize => "finalize",
            Self::End => "end",
        }
    }

    /// Phases that always run to completion once reached
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Finalize | Self::End)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of `decide_next`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Final check passed, or its attempt cap is reached
    Finalize,
    /// Failures remain and at least one has repair budget
    Retry,
    /// Failures remain but none can be repaired further
    Exit,
}

/// Choose the route out of `decide_next`
pub fn decide_route(state: &WorkflowState, limits: &WorkflowLimits) -> Route {
    if state.final_check_passed {
        return Route::Finalize;
    }
    if state.final_check_attempts >= limits.max_final_check_attempts {
        return Route::Finalize;
    }

    let repairable = state
        .failed_components
        .values()
        .any(|record| record.fix_attempts < limits.max_fix_attempts);
    if repairable {
        Route::Retry
    } else {
        Route::Exit
    }
}

/// Pure transition function; `None` once `end` has run
///
/// Any phase that marked the run aborted goes straight to `finalize`.
pub fn next_phase(phase: Phase, state: &WorkflowState, limits: &WorkflowLimits) -> Option<Phase> {
    if state.aborted && !phase.is_closing() {
        return Some(Phase::Finalize);
    }

    let next = match phase {
        Phase::Init => Phase::Analyze,
        Phase::Analyze => Phase::Setup,
        Phase::Setup => Phase::Generate,
        Phase::Generate if limits.generate_stories => Phase::GenerateStories,
        Phase::Generate => Phase::Validate,
        Phase::GenerateStories => Phase::Validate,
        Phase::Validate => Phase::TypescriptFix,
        Phase::TypescriptFix => Phase::QualityReview,
        Phase::QualityReview => Phase::FinalCheck,
        Phase::FinalCheck => Phase::DecideNext,
        Phase::DecideNext => match decide_route(state, limits) {
            Route::Retry => Phase::TypescriptFix,
            Route::Finalize | Route::Exit => Phase::Finalize,
        },
        Phase::Finalize => Phase::End,
        Phase::End => return None,
    };

    Some(next)
}
