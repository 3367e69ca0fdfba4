//! Exponential backoff with jitter for transient provider failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AgentError;

/// Runs `op` up to `attempts` times, sleeping `base * 2^n` plus up to 100 ms
/// of jitter between tries. Only [`AgentError::is_transient`] failures are
/// retried; anything else returns immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    attempts: u32,
    base: Duration,
    mut op: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
                let delay = base * 2u32.pow(attempt) + jitter;
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "transient llm error, backing off");
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| AgentError::Fatal("retry exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// **Scenario**: Transient failures are retried until success.
    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AgentError::Transient("503".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// **Scenario**: Non-transient failures are not retried.
    #[tokio::test]
    async fn fatal_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::Fatal("bad key".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: A persistent transient failure surfaces after the last
    /// attempt.
    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(3, Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::Transient("overloaded".into())) }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
