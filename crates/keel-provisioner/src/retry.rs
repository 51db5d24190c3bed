use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::ProviderError;

/// Run `op` until it succeeds, fails with a non-transient error, or runs out
/// of attempts. `on_retry` is told about each transient failure that will be
/// retried, with the attempt number that failed and the delay before the
/// next one.
///
/// Returns the number of attempts made alongside the final result.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: impl FnMut(u32, Duration, &ProviderError),
) -> (u32, Result<T, ProviderError>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return (attempt, Ok(value)),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                on_retry(attempt, delay, &e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}
