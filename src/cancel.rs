//! Helpers for racing work against a [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{CensusError, Result};

/// Run `fut` to completion unless `cancel` fires first.
pub async fn or_cancel<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CensusError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Sleep for `delay`, returning early with [`CensusError::Cancelled`] if cancelled.
pub async fn sleep(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    or_cancel(cancel, tokio::time::sleep(delay)).await
}

/// Fail fast when the token has already fired.
pub fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(CensusError::Cancelled)
    } else {
        Ok(())
    }
}
