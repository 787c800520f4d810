use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::ClientsError;
use crate::ClientsResult;

/// Short backoff schedule for idempotent GETs, independent of the job
/// queue's own retry/backoff: a transport hiccup on a read should not wait
/// for a full job-level retry cycle.
const GET_RETRY_BACKOFF: [Duration; 3] = [Duration::from_millis(200), Duration::from_millis(500), Duration::from_secs(1)];

fn is_retryable(error: &ClientsError) -> bool {
    matches!(error, ClientsError::Timeout(_) | ClientsError::Transport(_))
        || matches!(error, ClientsError::Rejected { status, .. } if *status >= 500)
}

/// Retries an idempotent GET up to three times on 5xx/transport errors with
/// short backoff. Mutating POSTs must never call this — the queue owns
/// retries there to preserve idempotency.
pub async fn retry_idempotent_get<F, Fut, T>(mut attempt: F) -> ClientsResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientsResult<T>>,
{
    let mut last_error = None;
    for backoff in GET_RETRY_BACKOFF.iter().copied().chain(std::iter::once(Duration::ZERO)) {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) if is_retryable(&error) => {
                warn!(%error, backoff_ms = backoff.as_millis(), "retrying idempotent GET");
                last_error = Some(error);
                if backoff > Duration::ZERO {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(error) => return Err(error),
        }
    }
    Err(last_error.unwrap_or(ClientsError::Transport("retry loop exhausted with no recorded error".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let result = retry_idempotent_get(|| {
            let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if count < 3 { Err(ClientsError::Transport("timeout".into())) } else { Ok(42) } }
        })
        .await
        .expect("should eventually succeed");
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let attempts = AtomicUsize::new(0);
        let result = retry_idempotent_get(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(ClientsError::Unauthorized) }
        })
        .await;
        assert!(matches!(result, Err(ClientsError::Unauthorized)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
