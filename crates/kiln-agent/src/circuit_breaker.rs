//! Circuit breaker guarding bursts of synthesis calls
//!
//! The batch executor records every item outcome here. After `threshold`
//! consecutive hard failures the breaker trips, and later bursts fall back
//! without calling the service until `cooldown` has passed. A single success
//! closes it again.

use crate::batch::HealthCheck;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Tripped and cooling down; bursts are refused
    Open,
    /// Cooldown over; the next burst is the probe
    HalfOpen,
}

/// Consecutive-failure breaker shared between a client and the batch executor
///
/// ```
/// use kiln_agent::{CircuitBreaker, CircuitState};
///
/// let breaker = CircuitBreaker::new(2, 60);
/// breaker.record_failure();
/// breaker.record_failure();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.can_execute());
/// ```
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    /// Times the breaker has tripped since creation
    trips: AtomicU32,
    /// Offset from `created` of the most recent failure, in millis
    tripped_at_ms: AtomicU64,
    created: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self::with_cooldown(threshold, Duration::from_secs(cooldown_secs))
    }

    pub fn with_cooldown(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            trips: AtomicU32::new(0),
            tripped_at_ms: AtomicU64::new(0),
            created: Instant::now(),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn is_tripped(&self) -> bool {
        self.consecutive_failures.load(Ordering::Acquire) >= self.threshold
    }

    /// Cooldown left while open
    fn remaining(&self) -> Option<Duration> {
        if !self.is_tripped() {
            return None;
        }
        let since = self
            .elapsed_ms()
            .saturating_sub(self.tripped_at_ms.load(Ordering::Acquire));
        self.cooldown
            .checked_sub(Duration::from_millis(since))
            .filter(|d| !d.is_zero())
    }

    pub fn state(&self) -> CircuitState {
        match (self.is_tripped(), self.remaining()) {
            (false, _) => CircuitState::Closed,
            (true, Some(_)) => CircuitState::Open,
            (true, None) => CircuitState::HalfOpen,
        }
    }

    pub fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous >= self.threshold {
            info!(failures = previous, "circuit breaker closed");
        }
    }

    pub fn record_failure(&self) {
        self.tripped_at_ms.store(self.elapsed_ms(), Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures == self.threshold {
            let trips = self.trips.fetch_add(1, Ordering::AcqRel) + 1;
            warn!(
                failures,
                trips,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// False only while open; a half-open breaker admits the probe burst
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn trips(&self) -> u32 {
        self.trips.load(Ordering::Acquire)
    }

    /// Milliseconds until the probe is admitted, 0 unless open
    pub fn time_until_retry(&self) -> u64 {
        self.remaining().map_or(0, |d| d.as_millis() as u64)
    }
}

impl Default for CircuitBreaker {
    /// Five hard failures in a row, one minute cooldown
    fn default() -> Self {
        Self::new(5, 60)
    }
}

#[async_trait]
impl HealthCheck for CircuitBreaker {
    async fn is_available(&self) -> bool {
        self.can_execute()
    }

    fn describe(&self) -> String {
        format!(
            "circuit breaker open after {} consecutive failures, probe in {}ms",
            self.failure_count(),
            self.time_until_retry()
        )
    }
}
