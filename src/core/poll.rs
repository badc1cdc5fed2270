//! Bounded polling.
//!
//! Frame discovery, auth-cookie detection, URL confirmation and row-count
//! growth are all "check every `interval` until it holds or `timeout` passes".
//! Every such loop goes through [`poll_until`] so none of them can spin forever.

use std::future::Future;
use std::time::Duration;

use super::error::Result;

/// Run `check` until it yields `Some`, sleeping `interval` between attempts.
///
/// Returns `Ok(None)` once `timeout` has elapsed without a hit. Errors from
/// `check` abort the poll immediately. The check always runs at least once.
pub async fn poll_until<T, F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(hit) = check().await? {
            return Ok(Some(hit));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval).await;
    }
}
