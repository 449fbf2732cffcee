//! Bounded exponential-backoff retry engine.
//!
//! [`execute_with_retry`] runs a caller-supplied thunk up to
//! `RetryPolicy::max_attempts` times, classifying each failure to decide
//! whether another attempt is worthwhile. The engine holds no state of its
//! own and performs no I/O beyond the cancellation-aware sleep between
//! attempts.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Disposition assigned to a failed attempt by [`classify`].
///
/// The scheduler (C7) treats `Unknown` the same as `Retriable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth trying again (transient external failure, cancellation/deadline).
    Retriable,
    /// Not worth trying again (usage error, permission/validation failure).
    NonRetriable,
    /// Classifier could not determine a kind; treated as retriable.
    Unknown,
}

/// Backoff policy for [`execute_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Must be `>= 1`.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub init_delay: Duration,
    /// Multiplier applied to the delay after each attempt. Must be `>= 1.0`.
    pub multiplier: f64,
    /// Upper bound on any single backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            init_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the attempt at index `attempt` (0-based, counting
    /// the attempt that just failed), capped at `max_delay`.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = (self.init_delay.as_millis() as f64) * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Error returned by [`execute_with_retry`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The thunk returned a non-retriable error on some attempt.
    #[error("non-retriable failure: {0}")]
    NonRetriable(E),
    /// All attempts were exhausted.
    #[error("exhausted {attempts} attempt(s), last error: {last}")]
    Exhausted { attempts: u32, last: E },
    /// The cancellation handle fired while waiting between attempts.
    #[error("retry cancelled")]
    Cancelled,
}

/// Run `thunk` under `policy`, retrying per [`ErrorKind`] classification.
///
/// `thunk` returns `Ok(result)` on success or `Err((error, kind))` on
/// failure. Returns immediately on success or on a `NonRetriable`
/// classification. On exhaustion, returns [`RetryError::Exhausted`]
/// carrying the last underlying error. If `cancel` fires while sleeping
/// between attempts, returns [`RetryError::Cancelled`] directly.
pub async fn execute_with_retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: RetryPolicy,
    mut thunk: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, (E, ErrorKind)>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err: Option<E> = None;

    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match thunk().await {
            Ok(result) => return Ok(result),
            Err((err, ErrorKind::NonRetriable)) => return Err(RetryError::NonRetriable(err)),
            Err((err, _)) => {
                let is_last = attempt + 1 >= max_attempts;
                last_err = Some(err);
                if is_last {
                    break;
                }

                let delay = policy.backoff_for(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }
    }

    Err(RetryError::Exhausted {
        attempts: max_attempts,
        last: last_err.expect("loop always records an error before exhausting"),
    })
}

/// Classify a failure from its cancellation state, process exit code, and
/// stderr text, per spec: cancellation/deadline are retriable; exit codes
/// `>= 2` and stderr patterns indicating permanent failure are
/// non-retriable; stderr patterns indicating transient failure are
/// retriable; anything else is [`ErrorKind::Unknown`].
pub fn classify(was_cancelled: bool, exit_code: Option<i32>, stderr: &str) -> ErrorKind {
    if was_cancelled {
        return ErrorKind::Retriable;
    }

    if let Some(code) = exit_code {
        if code >= 2 {
            return ErrorKind::NonRetriable;
        }
    }

    let lower = stderr.to_ascii_lowercase();

    const NON_RETRIABLE: &[&str] = &["permission denied", "invalid", "not found", "unauthorized"];
    if NON_RETRIABLE.iter().any(|needle| lower.contains(needle)) {
        return ErrorKind::NonRetriable;
    }

    const RETRIABLE: &[&str] = &[
        "timeout",
        "rate limit",
        "connection",
        "temporary",
        "unavailable",
    ];
    if RETRIABLE.iter().any(|needle| lower.contains(needle)) {
        return ErrorKind::Retriable;
    }

    ErrorKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            init_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> =
            execute_with_retry(&cancel, fast_policy(3), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> =
            execute_with_retry(&cancel, fast_policy(3), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(("connection refused".to_string(), ErrorKind::Retriable))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_stops_immediately() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> =
            execute_with_retry(&cancel, fast_policy(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(("permission denied".to_string(), ErrorKind::NonRetriable))
            })
            .await;
        assert!(matches!(result, Err(RetryError::NonRetriable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> =
            execute_with_retry(&cancel, fast_policy(3), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(("temporary glitch".to_string(), ErrorKind::Retriable))
            })
            .await;
        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_during_wait_returns_immediately() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 5,
            init_delay: Duration::from_secs(10),
            multiplier: 1.0,
            max_delay: Duration::from_secs(10),
        };
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel_clone.cancel();
        });
        let result: Result<u32, RetryError<String>> =
            execute_with_retry(&cancel, policy, || async {
                Err(("temporary".to_string(), ErrorKind::Retriable))
            })
            .await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn classify_cancellation_is_retriable() {
        assert_eq!(classify(true, None, ""), ErrorKind::Retriable);
    }

    #[test]
    fn classify_exit_code_ge_2_is_non_retriable() {
        assert_eq!(classify(false, Some(2), ""), ErrorKind::NonRetriable);
        assert_eq!(classify(false, Some(127), ""), ErrorKind::NonRetriable);
    }

    #[test]
    fn classify_permanent_stderr_patterns() {
        for needle in ["Permission Denied", "invalid argument", "not found", "UNAUTHORIZED"] {
            assert_eq!(classify(false, Some(1), needle), ErrorKind::NonRetriable);
        }
    }

    #[test]
    fn classify_transient_stderr_patterns() {
        for needle in [
            "Connection reset",
            "rate limit exceeded",
            "request TIMEOUT",
            "temporary failure",
            "service unavailable",
        ] {
            assert_eq!(classify(false, Some(1), needle), ErrorKind::Retriable);
        }
    }

    #[test]
    fn classify_unknown_falls_through() {
        assert_eq!(classify(false, Some(1), "something weird happened"), ErrorKind::Unknown);
        assert_eq!(classify(false, None, ""), ErrorKind::Unknown);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            init_delay: Duration::from_secs(1),
            multiplier: 10.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(5));
    }
}
