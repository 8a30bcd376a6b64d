//! Bounded in-worker retry with cancellable fixed delay
//!
//! Retries are synchronous and in-worker rather than deferred to broker
//! redelivery: handlers are not guaranteed idempotent across unrelated side
//! effects, and bounding attempts locally avoids redelivery storms while
//! giving transient failures a bounded number of immediate chances.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::error::HandlerError;

/// Fixed-delay retry policy applied to each handler invocation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocation budget, including the first attempt (>= 1)
    pub max_attempts: u32,
    /// Fixed interval between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Why a retried operation did not succeed
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed with a transient error; carries the last one
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The handler signalled a non-retryable failure; no further attempts
    /// were made and no retry budget was consumed
    #[error("terminal error, not retried: {0}")]
    Terminal(#[source] anyhow::Error),

    /// Shutdown was observed during the inter-attempt delay. Distinct from
    /// exhaustion: the worker leaves the message unacknowledged instead of
    /// dead-lettering it.
    #[error("retry aborted by shutdown")]
    Cancelled,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Invoke `f` up to `max_attempts` times.
    ///
    /// Returns on the first success. A terminal error short-circuits
    /// immediately. Between transient failures the policy sleeps `delay`,
    /// unless `shutdown` flips first; an in-flight invocation of `f` is
    /// never interrupted.
    pub async fn execute<F, Fut>(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        mut f: F,
    ) -> Result<(), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), HandlerError>>,
    {
        let mut attempt = 1u32;

        loop {
            match f().await {
                Ok(()) => return Ok(()),
                Err(HandlerError::Terminal(err)) => return Err(RetryError::Terminal(err)),
                Err(HandlerError::Transient(err)) => {
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "handler attempt failed, retrying after delay"
                    );

                    // pinned so a watch notification that is not a shutdown
                    // resumes the same sleep instead of restarting or
                    // skipping the remaining delay
                    let sleep = tokio::time::sleep(self.delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => break,
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return Err(RetryError::Cancelled);
                                }
                            }
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }
}
