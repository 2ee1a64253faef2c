//! Backoff wrapper for persistence writes
//!
//! A write is retried on an exponential schedule before its failure is
//! surfaced to the caller.

use crate::store::error::{StoreError, StoreResult};
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for store writes
pub fn write_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(1),
        max_elapsed_time: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

/// Run `op` until it succeeds or the backoff schedule runs out
pub async fn persist_with_backoff<T, F, Fut>(
    operation: &'static str,
    mut backoff: ExponentialBackoff,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next_backoff() {
                Some(delay) => {
                    tracing::warn!(operation, error = %e, ?delay, "store write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(operation, error = %e, "store write failed permanently");
                    return Err(StoreError::RetriesExhausted {
                        operation,
                        last_error: e.to_string(),
                    });
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Some(Duration::from_millis(50)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = persist_with_backoff("test", fast_backoff(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::DatabaseError("locked".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up() {
        let result: StoreResult<()> = persist_with_backoff("doomed", fast_backoff(), || async {
            Err(StoreError::DatabaseError("disk full".into()))
        })
        .await;

        match result {
            Err(StoreError::RetriesExhausted {
                operation,
                last_error,
            }) => {
                assert_eq!(operation, "doomed");
                assert!(last_error.contains("disk full"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
