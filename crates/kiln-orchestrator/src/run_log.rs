//! Human-readable run log at `.kiln/activity.md`
//!
//! Every write is fail-open: a log that cannot be written never stops a run.

use crate::state::PhaseError;
use crate::state_machine::{Phase, Route};
use crate::summary::RunSummary;
use chrono::Utc;
use kiln_core::fail_open::fail_open;
use kiln_core::Result;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const LOG_FILE: &str = "activity.md";

pub struct RunLog {
    output_path: PathBuf,
}

impl RunLog {
    pub fn new(kiln_dir: &Path) -> Self {
        Self {
            output_path: kiln_dir.join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Start a fresh log for a run
    pub async fn log_run_start(&self, run_id: Uuid, output_root: &Path) {
        fail_open("run_log::log_run_start", || async {
            if let Some(parent) = self.output_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let content = format!(
                "# Kiln Activity Log\n\n## Run {}\n**Started**: {}\n**Output**: {}\n\n---\n\n",
                run_id,
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                output_root.display()
            );

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
        .await;
    }

    pub async fn log_phase(&self, phase: Phase, iteration: u32) {
        fail_open("run_log::log_phase", || async {
            self.append(&format!(
                "### {} (step {})\n**Time**: {}\n\n",
                phase,
                iteration,
                Utc::now().format("%H:%M:%S")
            ))
            .await
        })
        .await;
    }

    /// Errors a phase added to the run
    pub async fn log_errors(&self, errors: &[PhaseError]) {
        if errors.is_empty() {
            return;
        }
        fail_open("run_log::log_errors", || async {
            let mut content = String::from("**Errors**:\n");
            for error in errors {
                content.push_str(&format!("- {}\n", error.message));
            }
            content.push('\n');
            self.append(&content).await
        })
        .await;
    }

    pub async fn log_route(&self, route: Route, attempts: u32, failing: usize) {
        fail_open("run_log::log_route", || async {
            self.append(&format!(
                "**Route**: {:?} (final check attempts: {}, failing artifacts: {})\n\n",
                route, attempts, failing
            ))
            .await
        })
        .await;
    }

    pub async fn log_summary(&self, summary: &RunSummary) {
        fail_open("run_log::log_summary", || async {
            self.append(&format!("---\n\n## Summary\n\n```\n{}```\n", summary.render()))
                .await
        })
        .await;
    }

    async fn append(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_log_sections() {
        let temp_dir = TempDir::new().unwrap();
        let log = RunLog::new(&temp_dir.path().join(".kiln"));

        log.log_run_start(Uuid::new_v4(), Path::new("ui")).await;
        log.log_phase(Phase::Validate, 6).await;
        log.log_errors(&[PhaseError::new(Phase::Validate, "unattributed: tsconfig")])
            .await;
        log.log_route(Route::Retry, 1, 2).await;

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("# Kiln Activity Log"));
        assert!(content.contains("### validate (step 6)"));
        assert!(content.contains("- unattributed: tsconfig"));
        assert!(content.contains("**Route**: Retry"));
    }

    #[tokio::test]
    async fn test_unwritable_log_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // Parent is a regular file, so every write fails
        let log = RunLog::new(&blocker);
        log.log_run_start(Uuid::new_v4(), Path::new("ui")).await;
        log.log_phase(Phase::Init, 1).await;
        assert!(!log.path().exists());
    }
}
