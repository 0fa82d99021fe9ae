//! Retry, Cancellation and Scheduling Primitives
//!
//! All blocking operations in the core accept a [`CancelToken`] so that
//! in-flight waits can be torn down cooperatively. Polling loops are driven
//! by [`Ticker`], which schedules the next tick only after the current one
//! completes, so polls never overlap.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use super::error::SwapError;

/// Cancellation side of a [`cancel_pair`]. Dropping the handle without
/// calling [`CancelHandle::cancel`] leaves the token alive forever.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every token cloned from this pair.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked cancellation handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled. Pends forever if the handle
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Bounded exponential backoff policy
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Retry a fallible async operation with bounded exponential backoff.
///
/// Only errors classified retryable by [`SwapError::is_retryable`] are
/// retried; everything else propagates immediately. Cancellation during a
/// backoff sleep returns [`SwapError::Cancelled`].
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    policy: Backoff,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, SwapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SwapError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(SwapError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    target: "satswap::retry",
                    %label, attempt, error = %err, "retrying after transient error"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(SwapError::Cancelled),
                }
                delay = (delay * 2).min(policy.max_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Cancellable fixed-delay ticker.
///
/// The first tick fires immediately; each subsequent tick fires `period`
/// after the caller returns to `tick()`, so slow work stretches the cycle
/// instead of stacking polls.
pub struct Ticker {
    period: Duration,
    cancel: CancelToken,
    first: bool,
}

impl Ticker {
    pub fn new(period: Duration, cancel: CancelToken) -> Self {
        Self {
            period,
            cancel,
            first: true,
        }
    }

    /// Wait for the next tick. Returns `false` once cancelled.
    pub async fn tick(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.first {
            self.first = false;
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.period) => !self.cancel.is_cancelled(),
            _ = self.cancel.cancelled() => false,
        }
    }
}
