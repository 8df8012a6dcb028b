//! Per-artifact pass/fail ledger with bounded repair attempts
//!
//! Every operation takes the state by value and returns the updated state.
//! An artifact is never in both `failed_components` and
//! `validated_components`.

use crate::state::WorkflowState;
use kiln_core::FailureRecord;
use serde::{Deserialize, Serialize};

/// Where an artifact stands in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Neither failed nor validated yet
    NeverFailed,
    /// Failing, no repair attempted
    Failed,
    /// Failing after at least one repair attempt
    FixAttempted,
    /// In `validated_components`
    Resolved,
}

/// Record a failure, keeping any repair history already accumulated
pub fn record_failure(mut state: WorkflowState, mut record: FailureRecord) -> WorkflowState {
    let name = record.component_name.clone();
    if let Some(existing) = state.failed_components.get(&name) {
        record.fix_attempts = existing.fix_attempts;
        record.attempted_fix = existing.attempted_fix;
    }

    state.validated_components.retain(|n| *n != name);
    state.failed_components.insert(name, record);
    state
}

/// Count a repair attempt; unknown names are ignored
pub fn record_fix_attempt(mut state: WorkflowState, name: &str) -> WorkflowState {
    if let Some(record) = state.failed_components.get_mut(name) {
        record.attempted_fix = true;
        record.fix_attempts += 1;
    }
    state
}

/// Mark an artifact as passing
pub fn resolve(mut state: WorkflowState, name: &str) -> WorkflowState {
    state.failed_components.remove(name);
    if !state.validated_components.iter().any(|n| n == name) {
        state.validated_components.push(name.to_string());
    }
    state
}

pub fn is_converged(state: &WorkflowState) -> bool {
    state.failed_components.is_empty()
}

pub fn status_of(state: &WorkflowState, name: &str) -> ArtifactStatus {
    match state.failed_components.get(name) {
        Some(record) if record.attempted_fix => ArtifactStatus::FixAttempted,
        Some(_) => ArtifactStatus::Failed,
        None if state.validated_components.iter().any(|n| n == name) => {
            ArtifactStatus::Resolved
        }
        None => ArtifactStatus::NeverFailed,
    }
}

/// Whether `name` is failing and still has repair budget
pub fn has_fix_budget(state: &WorkflowState, name: &str, max_fix_attempts: u32) -> bool {
    state
        .failed_components
        .get(name)
        .is_some_and(|r| r.fix_attempts < max_fix_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(name: &str) -> FailureRecord {
        FailureRecord::new(name, format!("ui/elements/{name}/{name}.tsx"))
            .with_errors(vec![format!("{name}.tsx(1,1): error TS1000: x")])
    }

    #[test]
    fn test_record_failure_moves_out_of_validated() {
        let state = resolve(WorkflowState::new(), "Button");
        assert_eq!(status_of(&state, "Button"), ArtifactStatus::Resolved);

        let state = record_failure(state, failure("Button"));
        assert_eq!(status_of(&state, "Button"), ArtifactStatus::Failed);
        assert!(state.validated_components.is_empty());
    }

    #[test]
    fn test_record_failure_keeps_attempts() {
        let state = record_failure(WorkflowState::new(), failure("Card"));
        let state = record_fix_attempt(state, "Card");
        let state = record_fix_attempt(state, "Card");

        let state = record_failure(state, failure("Card").with_errors(vec!["new".to_string()]));
        let record = &state.failed_components["Card"];
        assert_eq!(record.fix_attempts, 2);
        assert!(record.attempted_fix);
        assert_eq!(record.errors, vec!["new"]);
        assert_eq!(status_of(&state, "Card"), ArtifactStatus::FixAttempted);
    }

    #[test]
    fn test_fix_attempt_on_unknown_is_noop() {
        let state = record_fix_attempt(WorkflowState::new(), "Ghost");
        assert!(state.failed_components.is_empty());
        assert_eq!(status_of(&state, "Ghost"), ArtifactStatus::NeverFailed);
    }

    #[test]
    fn test_resolve_no_duplicates() {
        let state = resolve(WorkflowState::new(), "Icon");
        let state = resolve(state, "Icon");
        assert_eq!(state.validated_components, vec!["Icon"]);
    }

    #[test]
    fn test_fix_budget() {
        let state = record_failure(WorkflowState::new(), failure("Nav"));
        assert!(has_fix_budget(&state, "Nav", 1));
        let state = record_fix_attempt(state, "Nav");
        assert!(!has_fix_budget(&state, "Nav", 1));
        assert!(!has_fix_budget(&state, "Missing", 10));
    }

    #[test]
    fn test_convergence_property() {
        // Deterministic pseudo-random walk over the four operations
        let names = ["A", "B", "C", "D"];
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut state = WorkflowState::new();

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let name = names[(seed % 4) as usize];

            state = match (seed >> 8) % 3 {
                0 => record_failure(state, failure(name)),
                1 => record_fix_attempt(state, name),
                _ => resolve(state, name),
            };

            for n in names {
                let failed = state.failed_components.contains_key(n);
                let validated = state.validated_components.iter().filter(|v| **v == n).count();
                assert!(!(failed && validated > 0), "{} in both sets", n);
                assert!(validated <= 1, "{} validated twice", n);
            }
            assert_eq!(is_converged(&state), state.failed_components.is_empty());
        }

        // Resolving everything converges
        for n in names {
            state = resolve(state, n);
        }
        assert!(is_converged(&state));
        assert_eq!(state.validated_components.len(), names.len());
    }
}
