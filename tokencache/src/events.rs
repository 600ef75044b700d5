//! Structured cache events.
//!
//! Every state transition inside the adapter is described by a [`CacheEvent`]
//! and handed to a [`CacheEventSink`] that the host passes in explicitly.
//! The default [`TracingEventSink`] turns each event into a `tracing` record
//! with structured fields; [`MemoryEventSink`] records events for inspection.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

/// Logical L2 operation, used in events and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum L2Operation {
    /// Fetch bytes.
    Read,
    /// Store bytes.
    Write,
    /// Delete an entry.
    Remove,
    /// Extend the remote entry's TTL.
    Refresh,
}

impl L2Operation {
    /// Short lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            L2Operation::Read => "read",
            L2Operation::Write => "write",
            L2Operation::Remove => "remove",
            L2Operation::Refresh => "refresh",
        }
    }
}

impl fmt::Display for L2Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named event categories emitted by the adapter.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEvent {
    /// Read served from L1.
    L1Hit { key: String, size_bytes: u64 },

    /// Read missed L1 (or L1 is disabled).
    L1Miss { key: String },

    /// An L2 operation finished successfully.
    L2OperationCompleted {
        operation: L2Operation,
        key: String,
        elapsed: Duration,
        in_retry: bool,
    },

    /// An L2 operation failed.
    L2ConnectionError {
        operation: L2Operation,
        key: String,
        message: String,
        in_retry: bool,
    },

    /// The failure policy asked for one more attempt.
    L2Retry { operation: L2Operation, key: String },

    /// An L2 operation failed for good and was absorbed.
    L2Degraded { operation: L2Operation, key: String },

    /// A value read from L2 was copied into L1.
    BackPropagated {
        key: String,
        size_bytes: u64,
        ttl: Option<Duration>,
    },

    /// A suggested expiry in the past was clamped to the minimum TTL.
    NegativeExpiryClamped { key: String, overdue: Duration },

    /// An L1 hit did not refresh L2 because a recent refresh exists.
    RefreshSkipped { key: String },

    /// Encryption was requested but no protector is available.
    ProtectionDisabled { reason: String },
}

/// Receives adapter events.
pub trait CacheEventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: CacheEvent);
}

/// Emits every event as a `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl CacheEventSink for TracingEventSink {
    fn emit(&self, event: CacheEvent) {
        match event {
            CacheEvent::L1Hit { key, size_bytes } => {
                debug!(key = %key, size_bytes, "L1 cache hit");
            }
            CacheEvent::L1Miss { key } => {
                debug!(key = %key, "L1 cache miss");
            }
            CacheEvent::L2OperationCompleted {
                operation,
                key,
                elapsed,
                in_retry,
            } => {
                debug!(
                    operation = %operation,
                    key = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    in_retry,
                    "L2 operation completed"
                );
            }
            CacheEvent::L2ConnectionError {
                operation,
                key,
                message,
                in_retry,
            } => {
                error!(
                    operation = %operation,
                    key = %key,
                    error = %message,
                    in_retry,
                    "L2 cache connection error"
                );
            }
            CacheEvent::L2Retry { operation, key } => {
                warn!(operation = %operation, key = %key, "Retrying L2 operation once");
            }
            CacheEvent::L2Degraded { operation, key } => {
                warn!(
                    operation = %operation,
                    key = %key,
                    "L2 operation degraded, continuing without remote cache"
                );
            }
            CacheEvent::BackPropagated {
                key,
                size_bytes,
                ttl,
            } => {
                debug!(
                    key = %key,
                    size_bytes,
                    ttl_ms = ttl.map(|t| t.as_millis() as u64),
                    "Back-propagated L2 entry into L1"
                );
            }
            CacheEvent::NegativeExpiryClamped { key, overdue } => {
                warn!(
                    key = %key,
                    overdue_ms = overdue.as_millis() as u64,
                    "Suggested expiry already passed, clamping L1 TTL"
                );
            }
            CacheEvent::RefreshSkipped { key } => {
                trace!(key = %key, "L2 refresh skipped, refreshed recently");
            }
            CacheEvent::ProtectionDisabled { reason } => {
                warn!(reason = %reason, "L2 payload encryption disabled");
            }
        }
    }
}

/// Records events in memory, for diagnostics and tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl MemoryEventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far.
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    /// Count events matching a predicate.
    pub fn count(&self, predicate: impl Fn(&CacheEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Drop recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl CacheEventSink for MemoryEventSink {
    fn emit(&self, event: CacheEvent) {
        self.events.lock().push(event);
    }
}
