//! Retry with quadratic backoff for transient remote failures.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

/// Total attempts before a transient failure is surfaced.
pub const MAX_ATTEMPTS: u32 = 6;

/// Run `op`, retrying transient failures with a quadratic backoff
/// schedule: after attempt *n* the wait is *n²* seconds.
///
/// Non-transient errors surface immediately. On exhaustion the last
/// transient error is returned; callers decide whether to log-and-drop.
pub async fn with_retry<T, F, Fut>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = Duration::from_secs(u64::from(attempt * attempt));
                tracing::warn!(
                    operation,
                    attempt,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "transient failure, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = with_retry("test", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ClientError::transient("flaky"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_six_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = with_retry("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::transient("always down"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_fails_fast() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = with_retry("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::bad_request("malformed"))
        })
        .await;

        assert!(matches!(result, Err(ClientError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
