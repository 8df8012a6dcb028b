//! # kiln-agent
//!
//! Remote collaborators for Kiln and the discipline for calling them.
//!
//! - [`CodeSynthesizer`]: generates, repairs and writes stories for artifacts
//!   ([`AnthropicSynthesizer`] over the Messages API, [`MockSynthesizer`] for tests)
//! - [`DesignSource`]: supplies the design specification
//! - [`BatchExecutor`]: bounded-concurrency batches with exponential backoff
//! - [`CircuitBreaker`]: stops issuing bursts after repeated hard failures

mod batch;
mod circuit_breaker;
mod client;
mod design;
pub mod prompt;
mod synthesis;
mod types;

pub use batch::{
    require_completed, retry_with_backoff, BatchError, BatchExecutor, BatchJob, BatchOutcome,
    BatchProgress, BatchReport, HealthCheck, RetryOutcome, Unavailable,
};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{api_error, AnthropicSynthesizer};
pub use design::{DesignSource, FileDesignSource, StaticDesignSource};
pub use synthesis::{
    AvailableImport, CodeSynthesizer, GenerationContext, MockSynthesizer, SynthesisHealth,
    BROKEN_MARKER,
};
pub use types::*;
