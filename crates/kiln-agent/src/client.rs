//! Anthropic Messages API synthesizer
//!
//! Each call is a single stateless request. Retries are not done here: the
//! batch executor owns retry and backoff, and classifies failures through
//! [`KilnError::is_retryable`].

use crate::circuit_breaker::CircuitBreaker;
use crate::prompt::{
    build_fix_prompt, build_generate_prompt, build_story_prompt, extract_code_block,
    system_prompt,
};
use crate::synthesis::{CodeSynthesizer, GenerationContext};
use crate::types::{AnthropicErrorBody, AnthropicMessage, AnthropicRequest, AnthropicResponse, Usage};
use async_trait::async_trait;
use kiln_core::{
    ArtifactRecord, ComponentSpec, FixRequest, GeneratedArtifact, KilnError, ModelConfig, Result,
    TransportKind,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Synthesizer backed by the Anthropic Messages API
pub struct AnthropicSynthesizer {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: Option<String>,
    breaker: Arc<CircuitBreaker>,
    usage: Mutex<Usage>,
}

impl AnthropicSynthesizer {
    /// Build from config, reading the key from `config.api_key_env`
    pub fn from_config(config: &ModelConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "no API key found, synthesis unavailable");
        }

        Self {
            http: reqwest::Client::new(),
            config: config.clone(),
            api_key,
            breaker: Arc::new(CircuitBreaker::default()),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Breaker shared with the batch executor that drives this client
    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// Token usage accumulated across calls
    pub fn usage(&self) -> Usage {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            KilnError::Config(format!("{} is not set", self.config.api_key_env))
        })?;

        let request = AnthropicRequest {
            model: self.config.default.clone(),
            max_tokens: self.config.max_tokens,
            system: Some(system_prompt().to_string()),
            messages: vec![AnthropicMessage::user(prompt)],
        };

        debug!(model = %request.model, "Sending request to Anthropic API");

        let response = self
            .http
            .post(&self.config.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| KilnError::Synthesis(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            info!(
                "Tokens: {} in, {} out",
                usage.input_tokens, usage.output_tokens
            );
            if let Ok(mut total) = self.usage.lock() {
                total.add(usage);
            }
        }

        Ok(parsed.text())
    }

    async fn complete_code(&self, prompt: String, what: &str) -> Result<String> {
        let output = self.complete(prompt).await?;
        extract_code_block(&output)
            .ok_or_else(|| KilnError::Synthesis(format!("empty response for {}", what)))
    }
}

#[async_trait]
impl CodeSynthesizer for AnthropicSynthesizer {
    async fn generate(
        &self,
        spec: &ComponentSpec,
        context: &GenerationContext,
    ) -> Result<GeneratedArtifact> {
        let code = self
            .complete_code(build_generate_prompt(spec, context), &spec.name)
            .await?;
        Ok(GeneratedArtifact {
            name: spec.name.clone(),
            tier: spec.tier,
            code,
        })
    }

    async fn fix(&self, request: &FixRequest) -> Result<String> {
        self.complete_code(build_fix_prompt(request), &request.name)
            .await
    }

    async fn generate_story(&self, artifact: &ArtifactRecord, code: &str) -> Result<String> {
        self.complete_code(build_story_prompt(artifact, code), &artifact.name)
            .await
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some() && self.breaker.can_execute()
    }
}

/// Map a non-success response to [`KilnError::Api`], preferring the API's own message
pub fn api_error(status: u16, body: &str) -> KilnError {
    let message = serde_json::from_str::<AnthropicErrorBody>(body)
        .map(|b| format!("{}: {}", b.error.error_type, b.error.message))
        .unwrap_or_else(|_| body.trim().to_string());
    KilnError::Api { status, message }
}

fn transport_error(err: reqwest::Error) -> KilnError {
    KilnError::Transport {
        kind: transport_kind(&err),
        message: err.to_string(),
    }
}

/// Classify a request failure by walking its source chain
fn transport_kind(err: &reqwest::Error) -> TransportKind {
    if err.is_timeout() {
        return TransportKind::TimedOut;
    }

    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    TransportKind::ConnectionReset
                }
                std::io::ErrorKind::TimedOut => TransportKind::TimedOut,
                _ => TransportKind::Other,
            };
        }
        source = inner.source();
    }

    TransportKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Tier;

    fn config(base_url: &str) -> ModelConfig {
        ModelConfig {
            api_key_env: "KILN_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            base_url: base_url.to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_api_error_uses_error_body() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = api_error(529, body);
        assert!(matches!(err, KilnError::Api { status: 529, .. }));
        assert!(err.to_string().contains("overloaded_error: Overloaded"));

        let err = api_error(429, "  slow down ");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow down"));
    }

    #[tokio::test]
    async fn test_unavailable_without_key() {
        let synth = AnthropicSynthesizer::from_config(&config("http://127.0.0.1:1/v1/messages"));
        assert!(!synth.is_available().await);

        let synth = synth.with_api_key("sk-test");
        assert!(synth.is_available().await);

        synth.circuit_breaker().record_failure();
        for _ in 0..4 {
            synth.circuit_breaker().record_failure();
        }
        assert!(!synth.is_available().await);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let synth = AnthropicSynthesizer::from_config(&config("http://127.0.0.1:1/v1/messages"));
        let spec = ComponentSpec {
            name: "Button".to_string(),
            tier: Tier::Elements,
            description: String::new(),
        };
        let err = synth
            .generate(&spec, &GenerationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let synth = AnthropicSynthesizer::from_config(&config("http://127.0.0.1:1/v1/messages"))
            .with_api_key("sk-test");
        let request = FixRequest {
            name: "Button".to_string(),
            tier: Tier::Elements,
            code: String::new(),
            diagnostics: vec![],
        };
        let err = synth.fix(&request).await.unwrap_err();
        assert!(matches!(err, KilnError::Transport { .. }));
        assert_eq!(synth.usage(), Usage::default());
    }
}
