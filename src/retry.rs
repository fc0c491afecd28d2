use crate::error::{classify, is_transient};
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::warn;

pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Runs `operation` until it succeeds, pausing one second between attempts.
///
/// Only transient failures are retried; there is no attempt ceiling for them.
/// A permanent failure (see [`crate::error::is_transient`]) is returned as is.
pub async fn retry<T, F, Fut>(label: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_pause(DEFAULT_RETRY_PAUSE, label, operation).await
}

pub async fn retry_with_pause<T, F, Fut>(pause: Duration, label: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = FixedInterval::new(pause);
    let mut attempt: u64 = 0;

    RetryIf::spawn(strategy, operation, |error: &anyhow::Error| {
        attempt += 1;
        let transient = is_transient(error);
        if transient {
            warn!(
                operation = label,
                attempt,
                kind = classify(error),
                "Call failed, retrying in {:?}: {error:#}",
                pause
            );
        }
        transient
    })
    .await
}
