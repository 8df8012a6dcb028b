//! Configuration management for Kiln
//!
//! Repository-level settings: output layout, workflow caps, batching policy,
//! static-analysis commands and model selection.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::{KilnError, Result};

/// Per-project state directory (config, run log, run summary)
pub const KILN_DIR: &str = ".kiln";

/// Repository-level Kiln configuration
///
/// Loaded from `.kiln/config.toml` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Directory holding the four tier directories; must be relative and stay
    /// inside the project root so tool paths can be scoped to it
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Workflow loop caps
    #[serde(default)]
    pub workflow: WorkflowLimits,

    /// Batching/backoff policy for bulk remote calls
    #[serde(default)]
    pub batch: RetryPolicy,

    /// Static-analysis commands
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Model selection
    #[serde(default)]
    pub models: ModelConfig,
}

/// Finite bounds on every loop in the workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLimits {
    /// How many times `final_check` may run before the run is finalized
    #[serde(default = "default_max_final_check_attempts")]
    pub max_final_check_attempts: u32,

    /// Repair cycles allowed per artifact over the whole run
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,

    /// Repair cycles per artifact on a single visit of a repair phase
    #[serde(default = "default_fix_attempts_per_pass")]
    pub fix_attempts_per_pass: u32,

    /// Hard cap on executed phases
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Generate story files alongside artifacts
    #[serde(default = "default_true")]
    pub generate_stories: bool,
}

/// Batching and retry policy for the batch executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_delay_between_batches_ms")]
    pub delay_between_batches_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

/// Static-analysis tool commands
///
/// `{target}` inside a command is replaced with the checked subpath. Commands
/// without it always check the whole project and rely on output filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_typecheck_command")]
    pub typecheck: String,

    /// Lint command producing ESLint JSON; quality review is skipped when unset
    #[serde(default = "default_lint_command")]
    pub lint: Option<String>,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub default: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

// Default value providers
fn default_output_dir() -> PathBuf {
    PathBuf::from("ui")
}

fn default_max_final_check_attempts() -> u32 {
    3
}

fn default_max_fix_attempts() -> u32 {
    6
}

fn default_fix_attempts_per_pass() -> u32 {
    2
}

fn default_max_iterations() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    5
}

fn default_delay_between_batches_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_typecheck_command() -> String {
    "npx tsc --noEmit --pretty false".to_string()
}

fn default_lint_command() -> Option<String> {
    Some("npx eslint --format json {target}".to_string())
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

impl KilnConfig {
    /// Load configuration from `.kiln/config.toml` or use defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let config_path = Self::kiln_dir(project_root).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| KilnError::Config(format!("Failed to parse config file: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.kiln/config.toml`
    pub fn write_default(project_root: &Path) -> Result<PathBuf> {
        let config_dir = Self::kiln_dir(project_root);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| KilnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject settings that would make a loop unbounded, a batch empty, or
    /// place output outside the project
    pub fn validate(&self) -> Result<()> {
        let escapes = self.output_dir.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes || self.output_dir.as_os_str().is_empty() {
            return Err(KilnError::Config(
                "output_dir must be a relative path inside the project root".to_string(),
            ));
        }
        if self.batch.max_batch_size == 0 {
            return Err(KilnError::Config("batch.max_batch_size must be at least 1".to_string()));
        }
        if self.batch.backoff_multiplier < 1.0 {
            return Err(KilnError::Config(
                "batch.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.workflow.max_final_check_attempts == 0 || self.workflow.max_iterations == 0 {
            return Err(KilnError::Config(
                "workflow caps must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn kiln_dir(project_root: &Path) -> PathBuf {
        project_root.join(KILN_DIR)
    }

    /// Absolute output directory for a project root
    pub fn output_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.output_dir)
    }
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workflow: WorkflowLimits::default(),
            batch: RetryPolicy::default(),
            tools: ToolsConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_final_check_attempts: default_max_final_check_attempts(),
            max_fix_attempts: default_max_fix_attempts(),
            fix_attempts_per_pass: default_fix_attempts_per_pass(),
            max_iterations: default_max_iterations(),
            generate_stories: true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            delay_between_batches_ms: default_delay_between_batches_ms(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            typecheck: default_typecheck_command(),
            lint: default_lint_command(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = KilnConfig::load_or_default(temp_dir.path()).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("ui"));
        assert_eq!(config.workflow.max_final_check_attempts, 3);
        assert_eq!(config.batch.max_retries, 3);
        assert!(config.tools.lint.is_some());
    }

    #[test]
    fn test_write_then_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = KilnConfig::write_default(temp_dir.path()).unwrap();
        assert!(path.exists());

        let config = KilnConfig::load_or_default(temp_dir.path()).unwrap();
        assert_eq!(config.batch, RetryPolicy::default());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".kiln")).unwrap();
        std::fs::write(
            temp_dir.path().join(".kiln/config.toml"),
            "output_dir = \"src/ui\"\n\n[batch]\nmax_batch_size = 10\n",
        )
        .unwrap();

        let config = KilnConfig::load_or_default(temp_dir.path()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("src/ui"));
        assert_eq!(config.batch.max_batch_size, 10);
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(config.workflow.fix_attempts_per_pass, 2);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".kiln")).unwrap();
        std::fs::write(
            temp_dir.path().join(".kiln/config.toml"),
            "[batch]\nmax_batch_size = 0\n",
        )
        .unwrap();

        let err = KilnConfig::load_or_default(temp_dir.path()).unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
    }

    #[test]
    fn test_output_dir_outside_project_rejected() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".kiln")).unwrap();
        let config_path = temp_dir.path().join(".kiln/config.toml");

        for dir in ["/elsewhere/ui", "../shared/ui", "src/../../ui"] {
            std::fs::write(&config_path, format!("output_dir = \"{}\"\n", dir)).unwrap();
            let err = KilnConfig::load_or_default(temp_dir.path()).unwrap_err();
            assert!(
                matches!(&err, KilnError::Config(m) if m.contains("output_dir")),
                "{} accepted",
                dir
            );
        }

        std::fs::write(&config_path, "output_dir = \"./src/ui\"\n").unwrap();
        assert!(KilnConfig::load_or_default(temp_dir.path()).is_ok());
    }
}
