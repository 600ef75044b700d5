//! Per-call serialization hints.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Context passed into every cache operation.
///
/// Created by the caller for each call and never persisted. The cancellation
/// token is handed down to the L2 client, so cancelling it aborts in-flight
/// remote I/O rather than merely abandoning it.
#[derive(Clone, Debug, Default)]
pub struct SerializationHints {
    /// Cancels the operation and any L2 call it issues.
    pub cancellation: CancellationToken,

    /// Absolute expiry suggested by the token layer for this entry.
    pub suggested_expiry: Option<DateTime<Utc>>,
}

impl SerializationHints {
    /// Hints with a fresh token and no suggested expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Suggest an absolute expiry for the entry.
    pub fn with_suggested_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.suggested_expiry = Some(expiry);
        self
    }

    /// Whether the caller has already cancelled this operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
