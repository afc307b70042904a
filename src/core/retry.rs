//! Retry controller
//!
//! Runs one step of a transfer with bounded retries. Before the first
//! attempt the sink position is recorded; each retryable failure rewinds the
//! sink to that position, waits, and tries again. Restarting from the
//! recorded offset is only sound because every step appends and does not
//! assume it owns the sink position until it completes.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::Result;
use crate::core::observer::TransferObserver;
use crate::core::sink::OutputSink;
use crate::core::stream::{Backoff, TransferOptions};

/// A step of a transfer that may be attempted more than once
#[async_trait]
pub trait Attempt: Send + Sync {
    type Output: Send;

    async fn attempt(&self, sink: &mut dyn OutputSink) -> Result<Self::Output>;
}

/// Bounded retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_wait: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_wait: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }
}

impl From<&TransferOptions> for RetryPolicy {
    fn from(options: &TransferOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            retry_wait: options.retry_wait,
            backoff: options.backoff,
        }
    }
}

/// Run `step` against `sink`, retrying retryable failures per `policy`
///
/// Non-retryable failures return immediately without consuming a retry.
/// Once retries are exhausted the last retryable failure is returned.
pub async fn with_retry<A>(
    step: &A,
    sink: &mut dyn OutputSink,
    policy: &RetryPolicy,
    observer: &dyn TransferObserver,
) -> Result<A::Output>
where
    A: Attempt + ?Sized,
{
    let (snapshot, max_retries) = match sink.position().await {
        Ok(position) => (Some(position), policy.max_retries),
        Err(e) => {
            if policy.max_retries > 0 {
                observer.retries_disabled(&e);
            }
            (None, 0)
        }
    };

    let mut attempts = 0u32;
    loop {
        match step.attempt(sink).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_retryable() && attempts < max_retries => {
                attempts += 1;
                let wait = policy.backoff.delay(policy.retry_wait, attempts);
                observer.retrying(&e, attempts, wait);
                if let Some(position) = snapshot {
                    sink.rewind(position).await?;
                }
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
