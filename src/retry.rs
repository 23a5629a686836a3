use std::{future::Future, time::Duration};

use tokio::sync::watch;

/// Errors that may succeed when the same call is made again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// retries after the first attempt
    pub max_retries: u32,
    /// the nth retry waits `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(600),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Cooperative cancellation for long-running loads.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Option<watch::Receiver<bool>>);

impl CancelFlag {
    pub fn never() -> Self {
        Self(None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// resolves once the flag flips, or never when there is no sender left
    async fn cancelled(&self) {
        match &self.0 {
            Some(rx) => {
                let mut rx = rx.clone();
                if rx.wait_for(|c| *c).await.is_err() {
                    std::future::pending::<()>().await
                }
            }
            None => std::future::pending().await,
        }
    }
}

impl From<watch::Receiver<bool>> for CancelFlag {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self(Some(rx))
    }
}

/// Outcome of [`with_retry`] when it gives up.
#[derive(Debug)]
pub enum RetryError<E> {
    Failed(E),
    Cancelled,
}

/// Runs `op` until it succeeds, fails with a permanent error, runs out of
/// retries, or `cancel` flips. Backoff is linear in the attempt number.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancelFlag,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let err = tokio::select! {
            res = op() => match res {
                Ok(v) => return Ok(v),
                Err(e) => e,
            },
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
        };

        if !err.is_transient() || attempt >= policy.max_retries {
            return Err(RetryError::Failed(err));
        }

        attempt += 1;
        tracing::debug!(attempt, error = %err, "retrying");

        tokio::select! {
            _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
        }
    }
}

/// Bounds a storage call by wall-clock time.
pub async fn with_timeout<T, E, Fut>(
    limit: Duration,
    what: &str,
    fut: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<crate::blob::BlobError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(crate::blob::BlobError::Timeout(what.to_string()).into()),
    }
}
