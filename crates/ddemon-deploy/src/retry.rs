//! Bounded retry with a cancellable inter-attempt wait
//!
//! Shared by the install and launch steps, which differ only in their remote
//! error vocabulary. Exactly one remote command is issued per attempt, and
//! every attempt starts from a fresh result — stale classification state is
//! never reused.

use std::future::Future;
use std::time::Duration;

use ddemon_core::prelude::*;
use ddemon_core::shell::RemoteCommandResult;

use crate::cancel::CancelToken;

/// Fixed-delay bounded retry. Interactive tooling wants predictable waits,
/// not exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of command issues, the first try included
    pub max_attempts: u32,
    /// Delay between attempts
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    /// Run `action` until it is no longer retryable, attempts run out, or the
    /// token is cancelled.
    ///
    /// The token is checked before every attempt, not only before the loop:
    /// cancellation may arrive during the inter-attempt wait. `on_wait` is
    /// invoked before each delay so the caller can report progress.
    pub async fn attempt<A, Fut, P, W>(
        &self,
        cancel: &CancelToken,
        mut action: A,
        mut is_retryable: P,
        mut on_wait: W,
    ) -> Result<RemoteCommandResult>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<RemoteCommandResult>>,
        P: FnMut(&RemoteCommandResult) -> bool,
        W: FnMut(),
    {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = action().await?;
            attempts += 1;

            if !is_retryable(&result) || attempts >= self.max_attempts {
                return Ok(result);
            }

            on_wait();
            tokio::select! {
                _ = tokio::time::sleep(self.wait) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}
