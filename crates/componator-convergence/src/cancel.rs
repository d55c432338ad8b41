//! Cancellation of in-flight provider calls

use std::future::Future;

use componator_common::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Issue a provider call unless the pass is cancelled, and abandon it if
/// cancellation arrives while it is in flight
pub async fn cancellable<T, F, Fut>(
    cancel: &CancellationToken,
    resource: &str,
    call: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(resource));
    }

    tokio::select! {
        biased;
        result = call() => result,
        _ = cancel.cancelled() => Err(Error::cancelled(resource)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completed_call_passes_through() {
        let token = CancellationToken::new();
        let value = cancellable(&token, "r", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_call() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable(&token, "r", || async {
            Err::<(), _>(Error::internal_with_context("test", "call started"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn in_flight_call_is_abandoned() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = cancellable(&token, "r", || std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }
}
