//! Bounded retry with exponential backoff for transient errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{EtlError, Result};

/// Retry an operation a maximum number of additional times and return its
/// result.
///
/// The operation is only retried when it fails with a transient error (see
/// [`EtlError::is_transient`]); any other error is considered permanent and
/// re-raised immediately. Sleeps `5 ^ (attempt + 1)` seconds between
/// attempts. When all attempts are exhausted, the last transient cause is
/// preserved inside [`EtlError::RetriesExhausted`].
pub async fn retry<T, F, Fut>(max_retries: usize, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_failure: Option<EtlError> = None;
    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) if error.is_transient() => {
                let remaining = max_retries - attempt;
                if remaining > 0 {
                    let sleep_secs = 5u64.saturating_pow(attempt as u32 + 1);
                    warn!(
                        "Encountered the following error (retrying {} more time(s) after {}s sleep): {}",
                        remaining, sleep_secs, error
                    );
                    tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
                }
                last_failure = Some(error);
            }
            Err(error) => return Err(error),
        }
    }
    Err(EtlError::RetriesExhausted {
        attempts: max_retries,
        cause: Box::new(
            last_failure.unwrap_or_else(|| EtlError::Task("retry without any attempt".into())),
        ),
    })
}
