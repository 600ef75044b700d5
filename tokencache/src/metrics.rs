//! Lock-free counters for adapter activity.
//!
//! ```text
//! Adapter / RetryCoordinator ──► CacheMetrics ──► CacheMetricsSnapshot
//!                                (atomic counters)  (point-in-time copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::L2Operation;

/// Atomic counters shared by the adapter and its retry coordinator.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_reads: AtomicU64,
    l2_writes: AtomicU64,
    l2_removes: AtomicU64,
    l2_refreshes: AtomicU64,
    l2_retries: AtomicU64,
    l2_degraded: AtomicU64,
    back_propagations: AtomicU64,
    refreshes_skipped: AtomicU64,
}

impl CacheMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful L2 operation.
    pub(crate) fn l2_completed(&self, operation: L2Operation) {
        let counter = match operation {
            L2Operation::Read => &self.l2_reads,
            L2Operation::Write => &self.l2_writes,
            L2Operation::Remove => &self.l2_removes,
            L2Operation::Refresh => &self.l2_refreshes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn l2_retry(&self) {
        self.l2_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn l2_degraded(&self) {
        self.l2_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn back_propagated(&self) {
        self.back_propagations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn refresh_skipped(&self) {
        self.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_reads: self.l2_reads.load(Ordering::Relaxed),
            l2_writes: self.l2_writes.load(Ordering::Relaxed),
            l2_removes: self.l2_removes.load(Ordering::Relaxed),
            l2_refreshes: self.l2_refreshes.load(Ordering::Relaxed),
            l2_retries: self.l2_retries.load(Ordering::Relaxed),
            l2_degraded: self.l2_degraded.load(Ordering::Relaxed),
            back_propagations: self.back_propagations.load(Ordering::Relaxed),
            refreshes_skipped: self.refreshes_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`CacheMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    /// Successful L2 reads (hits and misses alike).
    pub l2_reads: u64,
    pub l2_writes: u64,
    pub l2_removes: u64,
    pub l2_refreshes: u64,
    /// Second attempts issued by the retry coordinator.
    pub l2_retries: u64,
    /// L2 operations that failed for good.
    pub l2_degraded: u64,
    pub back_propagations: u64,
    pub refreshes_skipped: u64,
}

impl CacheMetricsSnapshot {
    /// Fraction of reads served from L1, in `[0, 1]`.
    pub fn l1_hit_ratio(&self) -> f64 {
        let total = self.l1_hits + self.l1_misses;
        if total == 0 {
            0.0
        } else {
            self.l1_hits as f64 / total as f64
        }
    }
}
