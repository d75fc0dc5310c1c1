//! Bounded, jittered exponential backoff for backend calls.
//!
//! Embedding and generation providers share this policy: transient
//! failures (rate limits, server errors, network errors, timeouts) are
//! retried with exponential backoff — 1s, 2s, 4s, 8s, 16s, 32s (capped
//! at 2^5) — plus up to 250ms of random jitter so concurrent requests
//! don't storm the same backend. Non-retryable failures surface
//! immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// A backend call failure, classified for the retry loop.
#[derive(Debug)]
pub struct BackendError {
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Retry policy: attempt limit and per-call timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout_secs: u64) -> Self {
        Self {
            max_retries,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// Run `op` under the policy, retrying transient failures.
///
/// Each attempt is bounded by the policy timeout; a timed-out attempt
/// counts as a retryable failure. Returns the last error once the
/// attempt budget is exhausted.
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut last_err: Option<BackendError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.retryable => {
                tracing::warn!(
                    backend = what,
                    attempt = attempt + 1,
                    error = %e.message,
                    "transient backend failure"
                );
                last_err = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(backend = what, attempt = attempt + 1, "backend call timed out");
                last_err = Some(BackendError::retryable(format!(
                    "{} call timed out after {:?}",
                    what, policy.timeout
                )));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| BackendError::terminal(format!("{} failed with no attempts", what))))
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1 << (attempt - 1).min(5));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    base + jitter
}
