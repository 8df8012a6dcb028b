//! Static-analysis tool execution abstraction

use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Placeholder replaced with the checked subpath
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Output from a static-analysis tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Clean exit with no output
    pub fn clean() -> Self {
        Self::new(0, "", "")
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined, trimmed of surrounding whitespace
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

impl From<Output> for ToolOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Trait for running a static-analysis tool (allows mocking in tests)
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Short tool name used in errors and logs
    fn name(&self) -> &str;

    /// Run the tool, optionally narrowed to a subpath of the project
    async fn run(&self, target: Option<&str>) -> Result<ToolOutput>;

    /// Project root the tool runs in
    fn project_root(&self) -> &Path;
}

/// Runs a configured command line in the project root
#[derive(Debug, Clone)]
pub struct CommandToolRunner {
    name: String,
    program: String,
    args: Vec<String>,
    project_root: PathBuf,
}

impl CommandToolRunner {
    /// Parse a whitespace-separated command line such as `npx tsc --noEmit`
    pub fn from_command_line(
        name: impl Into<String>,
        command_line: &str,
        project_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| KilnError::Config("empty tool command".to_string()))?;

        Ok(Self {
            name: name.into(),
            program,
            args: parts.collect(),
            project_root: project_root.into(),
        })
    }

    /// Arguments with the target placeholder substituted (`.` when no target)
    pub fn resolved_args(&self, target: Option<&str>) -> Vec<String> {
        let target = target.unwrap_or(".");
        self.args
            .iter()
            .map(|arg| arg.replace(TARGET_PLACEHOLDER, target))
            .collect()
    }
}

#[async_trait]
impl ToolRunner for CommandToolRunner {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(tool = %self.name, root = %self.project_root.display()))]
    async fn run(&self, target: Option<&str>) -> Result<ToolOutput> {
        let args = self.resolved_args(target);
        debug!("Executing {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.project_root)
            .output()
            .await
            .map_err(|e| KilnError::Tool(format!("Failed to execute {}: {}", self.program, e)))?;

        let tool_output = ToolOutput::from(output);
        if !tool_output.success() {
            debug!(exit_code = ?tool_output.exit_code, "tool reported failure");
        }

        Ok(tool_output)
    }

    fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// Scripted tool runner for testing
///
/// Responses are queued per target (`None` is the whole-project run). Each
/// call pops the next response; the last one repeats once the queue drains.
#[derive(Clone)]
pub struct MockToolRunner {
    name: String,
    project_root: PathBuf,
    responses: Arc<Mutex<HashMap<Option<String>, VecDeque<ToolOutput>>>>,
    calls: Arc<Mutex<Vec<Option<String>>>>,
}

impl Default for MockToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolRunner {
    pub fn new() -> Self {
        Self {
            name: "mock-tool".to_string(),
            project_root: PathBuf::from("/mock/project"),
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn with_response(self, target: Option<&str>, output: ToolOutput) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses
                .entry(target.map(str::to_string))
                .or_default()
                .push_back(output);
        }
        self
    }

    /// Targets passed to `run`, in call order
    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, target: Option<&str>) -> Result<ToolOutput> {
        let key = target.map(str::to_string);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| KilnError::Tool("mock response lock poisoned".to_string()))?;
        let queue = responses
            .get_mut(&key)
            .ok_or_else(|| KilnError::Tool(format!("No mock response for: {:?}", key)))?;

        if queue.len() == 1 {
            return Ok(queue[0].clone());
        }
        queue
            .pop_front()
            .ok_or_else(|| KilnError::Tool(format!("No mock response for: {:?}", key)))
    }

    fn project_root(&self) -> &Path {
        &self.project_root
    }
}
