//! Retry coordinator for L2 operations.
//!
//! Every L2 call goes through [`RetryCoordinator::execute`], one generic helper
//! for every operation shape (bytes-returning `get`, unit-returning
//! `set`/`remove`/`refresh`).
//!
//! # State Machine
//!
//! ```text
//! First --ok--> Completed
//! First --err, no policy / policy says no--> Degraded
//! First --err, policy says yes--> Retry
//! Retry --ok--> Completed
//! Retry --err--> Degraded
//! any   --cancelled--> CacheError::Cancelled
//! ```
//!
//! There is no backoff and no timeout: the policy decides retry-or-not, and
//! the caller's cancellation token is the only deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, L2Error};
use crate::events::{CacheEvent, CacheEventSink, L2Operation};
use crate::metrics::CacheMetrics;
use crate::policy::L2FailurePolicy;

/// Which attempt of an L2 call is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
    /// The initial call.
    First,
    /// The single retry allowed by the failure policy.
    Retry,
}

impl Attempt {
    /// Whether this is the retried attempt.
    pub fn is_retry(self) -> bool {
        self == Attempt::Retry
    }
}

/// Final result of a coordinated L2 call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum L2Outcome<T> {
    /// The operation succeeded (possibly on the retry).
    Completed(T),
    /// The operation failed for good and was absorbed.
    Degraded,
}

impl<T> L2Outcome<T> {
    /// The value on success, `None` when degraded.
    pub fn completed(self) -> Option<T> {
        match self {
            L2Outcome::Completed(value) => Some(value),
            L2Outcome::Degraded => None,
        }
    }

    /// Whether the call was absorbed as degraded.
    pub fn is_degraded(&self) -> bool {
        matches!(self, L2Outcome::Degraded)
    }
}

/// Wraps L2 calls with failure classification and at most one retry.
#[derive(Clone)]
pub struct RetryCoordinator {
    policy: Option<Arc<dyn L2FailurePolicy>>,
    events: Arc<dyn CacheEventSink>,
    metrics: Arc<CacheMetrics>,
}

impl RetryCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `policy` - Retry decision for failed calls; `None` never retries
    /// * `events` - Sink for connection-error, retry and timing events
    /// * `metrics` - Shared counters
    pub fn new(
        policy: Option<Arc<dyn L2FailurePolicy>>,
        events: Arc<dyn CacheEventSink>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            policy,
            events,
            metrics,
        }
    }

    /// Run an L2 call under the retry contract.
    ///
    /// `call` is invoked once, and a second time only if the first attempt
    /// failed and the policy approves. The call races against `cancel`;
    /// the same token should be handed to the L2 client so the underlying
    /// I/O stops too.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Cancelled`] if the token fires or the L2 client
    /// reports cancellation. Every other failure becomes
    /// [`L2Outcome::Degraded`].
    pub async fn execute<T, F, Fut>(
        &self,
        operation: L2Operation,
        key: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<L2Outcome<T>, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, L2Error>>,
    {
        let mut attempt = Attempt::First;

        loop {
            let start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(L2Error::Cancelled),
                result = call() => result,
            };

            let err = match result {
                Ok(value) => {
                    self.metrics.l2_completed(operation);
                    self.events.emit(CacheEvent::L2OperationCompleted {
                        operation,
                        key: key.to_string(),
                        elapsed: start.elapsed(),
                        in_retry: attempt.is_retry(),
                    });
                    return Ok(L2Outcome::Completed(value));
                }
                Err(L2Error::Cancelled) => return Err(CacheError::Cancelled),
                Err(err) => err,
            };

            self.events.emit(CacheEvent::L2ConnectionError {
                operation,
                key: key.to_string(),
                message: err.to_string(),
                in_retry: attempt.is_retry(),
            });

            if attempt == Attempt::First && self.should_retry(&err) {
                self.metrics.l2_retry();
                self.events.emit(CacheEvent::L2Retry {
                    operation,
                    key: key.to_string(),
                });
                attempt = Attempt::Retry;
                continue;
            }

            self.metrics.l2_degraded();
            self.events.emit(CacheEvent::L2Degraded {
                operation,
                key: key.to_string(),
            });
            return Ok(L2Outcome::Degraded);
        }
    }

    fn should_retry(&self, err: &L2Error) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|policy| policy.should_retry(err))
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("has_policy", &self.policy.is_some())
            .finish_non_exhaustive()
    }
}
