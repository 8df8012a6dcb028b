//! # kiln-core
//!
//! Core types for the Kiln design-to-code pipeline.
//!
//! Kiln turns a design specification into verified UI source artifacts:
//! generate, type-check, repair, lint, repair again, and re-check the whole
//! tree until it converges or a bounded number of attempts runs out.
//!
//! This crate holds what every other crate agrees on:
//! - [`KilnError`] and the [`Result`] alias
//! - [`KilnConfig`] loaded from `.kiln/config.toml`
//! - artifact, diagnostic and failure-ledger types
//! - fail-open helpers for best-effort side effects

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    KilnConfig, ModelConfig, RetryPolicy, ToolsConfig, WorkflowLimits, KILN_DIR,
};
pub use error::{KilnError, Result, TransportKind, RETRYABLE_STATUS_CODES};
pub use types::*;
