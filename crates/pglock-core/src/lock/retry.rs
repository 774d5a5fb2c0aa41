//! Blocking acquisition on top of a try-operation
//!
//! The wait between attempts is the only place a blocking call can be
//! interrupted. Each attempt is a single store transaction, so giving up never
//! leaves a partially applied claim behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::trace;

use super::model::TryLockResult;
use crate::error::{LockError, Result};

/// Default interval between acquisition attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Cancellation signal shared between a caller and its blocking lock calls
///
/// Cloning yields a handle to the same signal. Once cancelled it stays
/// cancelled, and waiters that subscribe afterwards observe it immediately.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger cancellation
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the signal has been triggered
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// How a blocking call waits between attempts
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitPolicy {
    pub retry_interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl WaitPolicy {
    /// Configured interval, or the default when unset or zero
    pub fn interval(&self) -> Duration {
        match self.retry_interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => DEFAULT_RETRY_INTERVAL,
        }
    }

    fn check(&self, deadline: Option<Instant>) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(LockError::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(LockError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Call `attempt` until it acquires, fails, or the caller gives up.
///
/// Only "not acquired" is retried; store errors are returned as they are.
pub(crate) async fn retry_until_acquired<F, Fut>(
    policy: &WaitPolicy,
    mut attempt: F,
) -> Result<DateTime<Utc>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TryLockResult>>,
{
    let interval = policy.interval();
    let deadline = policy.timeout.map(|timeout| Instant::now() + timeout);
    let mut attempts: u64 = 0;

    loop {
        policy.check(deadline)?;

        attempts += 1;
        let result = attempt().await?;
        if let TryLockResult {
            acquired: true,
            expires_at: Some(expires_at),
        } = result
        {
            return Ok(expires_at);
        }

        trace!(attempts, interval_ms = interval.as_millis() as u64, "Lock busy, waiting");

        let cancelled = async {
            match &policy.cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sleep(interval) => {}
            _ = cancelled => return Err(LockError::Cancelled),
            _ = expired => return Err(LockError::DeadlineExceeded),
        }
    }
}
