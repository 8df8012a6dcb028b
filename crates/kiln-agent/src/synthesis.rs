//! Code-synthesis collaborator interface

use crate::batch::HealthCheck;
use async_trait::async_trait;
use kiln_core::{
    ArtifactRecord, ComponentSpec, FixRequest, GeneratedArtifact, KilnError, Result, Tier,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A lower-tier artifact the generated code may import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableImport {
    pub name: String,
    pub tier: Tier,
    pub import_path: String,
}

/// What the synthesizer knows beyond the component spec itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationContext {
    pub design_name: String,
    pub tokens: serde_json::Value,
    pub available: Vec<AvailableImport>,
}

/// Produces source code for artifacts (allows mocking in tests)
#[async_trait]
pub trait CodeSynthesizer: Send + Sync {
    /// Generate a new artifact from its spec
    async fn generate(
        &self,
        spec: &ComponentSpec,
        context: &GenerationContext,
    ) -> Result<GeneratedArtifact>;

    /// Return repaired source for an artifact
    async fn fix(&self, request: &FixRequest) -> Result<String>;

    /// Return the story file for an artifact
    async fn generate_story(&self, artifact: &ArtifactRecord, code: &str) -> Result<String>;

    /// Whether the service can be reached at all
    async fn is_available(&self) -> bool {
        true
    }
}

/// Adapts a synthesizer's availability into a batch precondition
pub struct SynthesisHealth(pub Arc<dyn CodeSynthesizer>);

#[async_trait]
impl HealthCheck for SynthesisHealth {
    async fn is_available(&self) -> bool {
        self.0.is_available().await
    }

    fn describe(&self) -> String {
        "code synthesis service unavailable".to_string()
    }
}

/// Lines containing this marker are dropped by [`MockSynthesizer::fix`]
pub const BROKEN_MARKER: &str = "KILN_BROKEN";

/// Scripted synthesizer for testing
///
/// Generated code is a minimal typed component unless overridden. `fix`
/// strips every line containing [`BROKEN_MARKER`], except for artifacts
/// registered as unfixable.
pub struct MockSynthesizer {
    code: HashMap<String, String>,
    generate_failures: HashMap<String, u16>,
    flaky: Mutex<HashMap<String, u32>>,
    unfixable: HashSet<String>,
    fail_stories: bool,
    available: bool,
    generate_calls: AtomicU32,
    fix_calls: AtomicU32,
    story_calls: AtomicU32,
    fixed: Mutex<Vec<String>>,
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            code: HashMap::new(),
            generate_failures: HashMap::new(),
            flaky: Mutex::new(HashMap::new()),
            unfixable: HashSet::new(),
            fail_stories: false,
            available: true,
            generate_calls: AtomicU32::new(0),
            fix_calls: AtomicU32::new(0),
            story_calls: AtomicU32::new(0),
            fixed: Mutex::new(Vec::new()),
        }
    }

    /// Default source produced for `name`
    pub fn default_code(name: &str) -> String {
        format!(
            "export interface {name}Props {{}}\n\nexport const {name} = (_props: {name}Props) => null;\n"
        )
    }

    pub fn with_code(mut self, name: &str, code: impl Into<String>) -> Self {
        self.code.insert(name.to_string(), code.into());
        self
    }

    /// `generate` for `name` always fails with this API status
    pub fn failing_generate(mut self, name: &str, status: u16) -> Self {
        self.generate_failures.insert(name.to_string(), status);
        self
    }

    /// `generate` for `name` fails with a 503 this many times, then succeeds
    pub fn flaky_generate(self, name: &str, failures: u32) -> Self {
        if let Ok(mut flaky) = self.flaky.lock() {
            flaky.insert(name.to_string(), failures);
        }
        self
    }

    /// `fix` for `name` returns the code unchanged
    pub fn unfixable(mut self, name: &str) -> Self {
        self.unfixable.insert(name.to_string());
        self
    }

    pub fn failing_stories(mut self) -> Self {
        self.fail_stories = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn fix_calls(&self) -> u32 {
        self.fix_calls.load(Ordering::SeqCst)
    }

    pub fn story_calls(&self) -> u32 {
        self.story_calls.load(Ordering::SeqCst)
    }

    /// Names passed to `fix`, in call order
    pub fn fixed(&self) -> Vec<String> {
        self.fixed.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CodeSynthesizer for MockSynthesizer {
    async fn generate(
        &self,
        spec: &ComponentSpec,
        _context: &GenerationContext,
    ) -> Result<GeneratedArtifact> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.generate_failures.get(&spec.name) {
            return Err(KilnError::Api {
                status: *status,
                message: format!("mock failure for {}", spec.name),
            });
        }

        if let Ok(mut flaky) = self.flaky.lock() {
            if let Some(remaining) = flaky.get_mut(&spec.name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(KilnError::Api {
                        status: 503,
                        message: "mock overloaded".to_string(),
                    });
                }
            }
        }

        let code = self
            .code
            .get(&spec.name)
            .cloned()
            .unwrap_or_else(|| Self::default_code(&spec.name));

        Ok(GeneratedArtifact {
            name: spec.name.clone(),
            tier: spec.tier,
            code,
        })
    }

    async fn fix(&self, request: &FixRequest) -> Result<String> {
        self.fix_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut fixed) = self.fixed.lock() {
            fixed.push(request.name.clone());
        }

        if self.unfixable.contains(&request.name) {
            return Ok(request.code.clone());
        }

        let mut repaired: String = request
            .code
            .lines()
            .filter(|line| !line.contains(BROKEN_MARKER))
            .collect::<Vec<_>>()
            .join("\n");
        repaired.push('\n');
        Ok(repaired)
    }

    async fn generate_story(&self, artifact: &ArtifactRecord, _code: &str) -> Result<String> {
        self.story_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_stories {
            return Err(KilnError::Synthesis("mock story failure".to_string()));
        }

        Ok(format!(
            "import {{ {name} }} from \"./{name}\";\n\nexport default {{ component: {name} }};\n\nexport const Default = {{}};\n",
            name = artifact.name
        ))
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            tier: Tier::Elements,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_generate_default_code() {
        let mock = MockSynthesizer::new();
        let artifact = mock
            .generate(&spec("Button"), &GenerationContext::default())
            .await
            .unwrap();

        assert_eq!(artifact.name, "Button");
        assert!(artifact.code.contains("export const Button"));
        assert_eq!(mock.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_generate_failures() {
        let mock = MockSynthesizer::new()
            .failing_generate("Bad", 400)
            .flaky_generate("Flaky", 1);
        let ctx = GenerationContext::default();

        let err = mock.generate(&spec("Bad"), &ctx).await.unwrap_err();
        assert!(!err.is_retryable());

        let err = mock.generate(&spec("Flaky"), &ctx).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(mock.generate(&spec("Flaky"), &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_fix_strips_marker() {
        let mock = MockSynthesizer::new().unfixable("Stuck");
        let code = format!("const a = 1;\nconst b: number = \"x\"; // {}\n", BROKEN_MARKER);

        let request = FixRequest {
            name: "Button".to_string(),
            tier: Tier::Elements,
            code: code.clone(),
            diagnostics: vec![],
        };
        assert_eq!(mock.fix(&request).await.unwrap(), "const a = 1;\n");

        let stuck = FixRequest {
            name: "Stuck".to_string(),
            ..request
        };
        assert_eq!(mock.fix(&stuck).await.unwrap(), code);
        assert_eq!(mock.fixed(), vec!["Button", "Stuck"]);
    }

    #[tokio::test]
    async fn test_synthesis_health() {
        let health = SynthesisHealth(Arc::new(MockSynthesizer::new().unavailable()));
        assert!(!health.is_available().await);

        let health = SynthesisHealth(Arc::new(MockSynthesizer::new()));
        assert!(health.is_available().await);
    }
}
