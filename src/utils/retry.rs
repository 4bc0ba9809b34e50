use crate::error::{AppError, AppResult};
use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 30;

/// Retry `op` on transient errors with exponential backoff (1s, 2s, 4s, ...
/// capped at 30s). Non-transient errors and exhausted retries propagate.
pub async fn with_backoff<T, F, Fut>(op_name: &str, max_attempts: u32, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut delay = Duration::from_secs(BASE_DELAY_SECS);
    let mut attempt: u32 = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {} - retrying in {:?}",
                    op_name, attempt, max_attempts, err, delay
                );
                sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(MAX_DELAY_SECS));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Promote a transient error that survived all retries to a per-file failure.
pub fn exhausted_to_file_failed(err: AppError) -> AppError {
    if err.is_transient() {
        AppError::FileFailed(format!("retries exhausted: {}", err))
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test-op", 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::ProviderTransient("flaky".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = with_backoff("test-op", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::ProviderFatal("bad key".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let result: AppResult<()> = with_backoff("test-op", 2, || async {
            Err(AppError::StoreTransient("503".to_string()))
        })
        .await;
        match result {
            Err(AppError::StoreTransient(_)) => {}
            other => panic!("unexpected: {:?}", other.err().map(|e| e.to_string())),
        }
    }
}
