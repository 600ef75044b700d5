//! L2 failure policies.
//!
//! A failure policy decides, per failed L2 operation, whether the retry
//! coordinator should re-invoke it once. Policies are strategy objects so
//! hosts can inject them alongside their other services; closures are
//! accepted through [`FnFailurePolicy`].

use std::fmt;

use crate::error::L2Error;

/// Decides whether a failed L2 operation is retried once.
pub trait L2FailurePolicy: Send + Sync {
    /// Return `true` to retry the failed operation exactly once.
    fn should_retry(&self, error: &L2Error) -> bool;
}

/// Retry connectivity and timeout failures, nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryTransient;

impl L2FailurePolicy for RetryTransient {
    fn should_retry(&self, error: &L2Error) -> bool {
        error.is_transient()
    }
}

/// Retry every failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryAlways;

impl L2FailurePolicy for RetryAlways {
    fn should_retry(&self, _error: &L2Error) -> bool {
        true
    }
}

/// Adapts a predicate closure into a policy.
pub struct FnFailurePolicy<F>(F);

impl<F> FnFailurePolicy<F>
where
    F: Fn(&L2Error) -> bool + Send + Sync,
{
    /// Wrap a predicate.
    pub fn new(predicate: F) -> Self {
        Self(predicate)
    }
}

impl<F> L2FailurePolicy for FnFailurePolicy<F>
where
    F: Fn(&L2Error) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &L2Error) -> bool {
        (self.0)(error)
    }
}

impl<F> fmt::Debug for FnFailurePolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFailurePolicy")
    }
}
