//! Bounded retry for driver operations flagged as retriable.

use std::future::Future;
use std::time::Duration;

use cdp_driver::DriverError;
use tokio::time::sleep;
use tracing::warn;

pub const DEFAULT_ATTEMPTS: usize = 3;

/// Run `op` up to `attempts` times, backing off between tries. Only errors the
/// driver marks retriable are retried; others return immediately.
pub async fn with_retry<T, F, Fut>(
    attempts: usize,
    backoff: Duration,
    mut op: F,
) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.retriable && attempt < attempts => {
                warn!(target: "wispbrowser", attempt, %err, "retriable driver error");
                last_err = Some(err);
                sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("retry loop always records an error before exhausting"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_driver::{DriverError, DriverErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_retriable_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DriverError::new(DriverErrorKind::CdpIo).retriable(true))
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
    async fn non_retriable_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DriverError::new(DriverErrorKind::Internal)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_last_error() {
        let result: Result<(), _> = with_retry(2, Duration::from_millis(1), || async {
            Err(DriverError::new(DriverErrorKind::CdpIo).retriable(true))
        })
        .await;
        assert!(result.unwrap_err().retriable);
    }
}
