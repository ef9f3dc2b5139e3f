//! Bounded retry for writes that must land once earlier steps have committed.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Attempts per retried write.
pub(crate) const ATTEMPTS: u32 = 4;

/// First backoff; doubles after each failure.
pub(crate) const BASE_BACKOFF: Duration = Duration::from_millis(25);

/// Run `op` until it succeeds or `ATTEMPTS` are used up, sleeping
/// `BASE_BACKOFF * 2^n` between tries. Returns the last error.
pub(crate) async fn with_backoff<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = BASE_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < ATTEMPTS => {
                warn!(attempt, retry_in_ms = delay.as_millis() as u64, "{what} failed: {e}");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
