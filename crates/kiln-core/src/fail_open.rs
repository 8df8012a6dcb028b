//! Fail-open helpers for side effects that must never stop a run
//!
//! Use these for the run log, summary files and registry scans. Never use
//! them for validation: a swallowed validation error reads as a pass.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Run an async side effect, logging and discarding any error
///
/// ```no_run
/// use kiln_core::fail_open::fail_open;
/// use kiln_core::Result;
///
/// async fn append_log() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("run_log", || append_log()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation = operation_name, error = %e, "operation failed (fail-open)");
            None
        }
    }
}

/// Synchronous variant of [`fail_open`] returning a fallback value on error
pub fn fail_open_or<T>(operation_name: &str, fallback: T, f: impl FnOnce() -> Result<T>) -> T {
    match f() {
        Ok(val) => val,
        Err(e) => {
            warn!(operation = operation_name, error = %e, "operation failed (fail-open)");
            fallback
        }
    }
}

/// Like [`fail_open`] but retries with a doubling delay starting at `base_delay`
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_attempts: usize,
    base_delay: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    for attempt in 1..=max_attempts {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == max_attempts => {
                warn!(
                    "{} failed after {} attempts (fail-open): {}",
                    operation_name, max_attempts, e
                );
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KilnError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, KilnError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(KilnError::Other("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[test]
    fn test_fail_open_or_fallback() {
        let value = fail_open_or("scan", Vec::<u32>::new(), || {
            Err(KilnError::Registry("unreadable".to_string()))
        });
        assert!(value.is_empty());

        let value = fail_open_or("scan", Vec::new(), || Ok(vec![1, 2]));
        assert_eq!(value, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fail_open_with_retries_recovers() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "test_op",
            || {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 2 {
                        Err(KilnError::Other("transient".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(result, Some(7));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_fail_open_with_retries_gives_up() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "test_op",
            || {
                attempts += 1;
                async move { Err::<i32, _>(KilnError::Other("persistent".to_string())) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(result, None);
        assert_eq!(attempts, 3);
    }
}
