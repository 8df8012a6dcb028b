//! Bounded-concurrency batch execution with retry and backoff
//!
//! Jobs run in consecutive chunks of at most `max_batch_size`. Items inside a
//! chunk run concurrently; chunks run strictly in order with a fixed pause
//! between them. Each item retries transient failures with exponential
//! backoff and never affects its siblings.

use crate::circuit_breaker::CircuitBreaker;
use async_trait::async_trait;
use futures::future::join_all;
use kiln_core::{KilnError, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Precondition checked before any batching starts
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Human-readable reason used when the check fails
    fn describe(&self) -> String {
        "remote service unavailable".to_string()
    }
}

/// One unit of work
#[derive(Debug, Clone)]
pub struct BatchJob<I> {
    pub id: String,
    pub name: String,
    pub input: I,
}

impl<I> BatchJob<I> {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: I) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// A job that failed after its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub id: String,
    pub name: String,
    pub error: String,
    pub attempts: u32,
}

/// Results of a completed batch run
#[derive(Debug)]
pub struct BatchReport<R> {
    pub results: BTreeMap<String, R>,
    pub errors: Vec<BatchError>,
}

impl<R> Default for BatchReport<R> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
            errors: Vec::new(),
        }
    }
}

/// What a batch run produced
#[derive(Debug)]
pub enum BatchOutcome<R> {
    Completed(BatchReport<R>),
    /// The precondition failed; no job was attempted
    Fallback { reason: String },
}

impl<R> BatchOutcome<R> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Progress after a chunk completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based index of the chunk just finished
    pub batch: usize,
    pub total_batches: usize,
    pub processed: usize,
    pub total: usize,
    pub percent: f64,
}

/// Result of an operation run under [`retry_with_backoff`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Run `operation`, retrying retryable failures with exponential backoff
///
/// At most `policy.max_retries` retries follow the first attempt. Terminal
/// errors return immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay_ms = policy.initial_retry_delay_ms;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) if e.is_retryable() && attempts <= policy.max_retries => {
                warn!(
                    "{} failed ({}), retrying in {}ms (retry {}/{})",
                    label, e, delay_ms, attempts, policy.max_retries
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms as f64 * policy.backoff_multiplier).round() as u64;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("{} gave up after {} attempts: {}", label, attempts, e);
                } else {
                    debug!("{} failed with terminal error: {}", label, e);
                }
                return RetryOutcome {
                    result: Err(e),
                    attempts,
                };
            }
        }
    }
}

/// Runs jobs in ordered, bounded-concurrency chunks
#[derive(Clone)]
pub struct BatchExecutor {
    policy: RetryPolicy,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl BatchExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            health_checks: Vec::new(),
            breaker: None,
        }
    }

    /// Add a precondition; any failing check turns the run into a fallback
    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_checks.push(check);
        self
    }

    /// Record item outcomes on a shared breaker, which also acts as a precondition
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.health_checks.push(breaker.clone());
        self.breaker = Some(breaker);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn precondition_failure(&self) -> Option<String> {
        for check in &self.health_checks {
            if !check.is_available().await {
                return Some(check.describe());
            }
        }
        None
    }

    /// Run every job through `operation`
    ///
    /// `on_progress` is called once per finished chunk.
    pub async fn run<I, R, F, Fut>(
        &self,
        jobs: Vec<BatchJob<I>>,
        operation: F,
        mut on_progress: impl FnMut(&BatchProgress),
    ) -> BatchOutcome<R>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if let Some(reason) = self.precondition_failure().await {
            warn!(reason = %reason, jobs = jobs.len(), "batch precondition failed, falling back");
            return BatchOutcome::Fallback { reason };
        }

        let total = jobs.len();
        let chunk_size = self.policy.max_batch_size.max(1);
        let total_batches = total.div_ceil(chunk_size);
        let mut report = BatchReport::default();
        let mut processed = 0;
        let operation = &operation;

        for (index, chunk) in jobs.chunks(chunk_size).enumerate() {
            debug!(batch = index + 1, total_batches, size = chunk.len(), "starting batch");

            let outcomes = join_all(chunk.iter().map(|job| async move {
                let outcome =
                    retry_with_backoff(&job.name, &self.policy, || operation(job.input.clone()))
                        .await;
                (job, outcome)
            }))
            .await;

            for (job, outcome) in outcomes {
                match outcome.result {
                    Ok(value) => {
                        if let Some(breaker) = &self.breaker {
                            breaker.record_success();
                        }
                        report.results.insert(job.id.clone(), value);
                    }
                    Err(e) => {
                        if let Some(breaker) = &self.breaker {
                            breaker.record_failure();
                        }
                        report.errors.push(BatchError {
                            id: job.id.clone(),
                            name: job.name.clone(),
                            error: e.to_string(),
                            attempts: outcome.attempts,
                        });
                    }
                }
            }

            processed += chunk.len();
            let progress = BatchProgress {
                batch: index + 1,
                total_batches,
                processed,
                total,
                percent: (processed as f64 / total as f64 * 100.0).round(),
            };
            info!(
                "Batch {}/{} done: {}/{} ({}%)",
                progress.batch, total_batches, processed, total, progress.percent
            );
            on_progress(&progress);

            if index + 1 < total_batches {
                tokio::time::sleep(Duration::from_millis(self.policy.delay_between_batches_ms))
                    .await;
            }
        }

        BatchOutcome::Completed(report)
    }
}

/// Precondition that always fails, for configurations without a remote service
pub struct Unavailable(pub String);

#[async_trait]
impl HealthCheck for Unavailable {
    async fn is_available(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        self.0.clone()
    }
}

/// Convenience: turn a fallback into an error for callers that cannot degrade
pub fn require_completed<R>(outcome: BatchOutcome<R>) -> Result<BatchReport<R>> {
    match outcome {
        BatchOutcome::Completed(report) => Ok(report),
        BatchOutcome::Fallback { reason } => Err(KilnError::Synthesis(reason)),
    }
}
