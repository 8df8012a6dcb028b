//! # kiln-orchestrator
//!
//! Phase-driven workflow that turns a design spec into type-checked,
//! lint-clean UI artifacts.
//!
//! ```text
//! init → analyze → setup → generate → generate_stories → validate
//!      → typescript_fix → quality_review → final_check → decide_next
//!      → (typescript_fix | finalize) → end
//! ```
//!
//! - [`state_machine`]: the pure transition function and routing decision
//! - [`tracker`]: the per-artifact failure ledger
//! - [`Workflow`]: the runner executing phases against real or mock collaborators

mod phases;
mod run_log;
mod state;
pub mod state_machine;
mod summary;
pub mod tracker;
mod workflow;

pub use run_log::RunLog;
pub use state::{PhaseError, StateOverlay, WorkflowState};
pub use state_machine::{decide_route, next_phase, Phase, Route};
pub use summary::{RunSummary, UnresolvedArtifact, SUMMARY_FILE};
pub use tracker::ArtifactStatus;
pub use workflow::Workflow;
