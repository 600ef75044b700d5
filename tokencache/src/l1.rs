//! In-process L1 store backed by moka.
//!
//! The L1 store is a bounded, size-weighted cache with a per-entry absolute
//! expiration. Every entry carries its own TTL, fixed when it is written:
//! reading an entry never pushes its expiry out, and overwriting an entry
//! replaces its TTL with the new one.
//!
//! # Why moka?
//!
//! - Lock-free reads (common case)
//! - Concurrent writes without blocking the runtime
//! - Size-bounded eviction driven by a weigher
//! - Per-entry expiration through the `Expiry` trait
//!
//! moka is eventually consistent for its counters: `entry_count()` and
//! `size_bytes()` are only exact after `run_pending_tasks()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::future::Cache as MokaCache;
use moka::Expiry;

/// Default L1 eviction budget: 500 MiB.
pub const DEFAULT_L1_SIZE_LIMIT_BYTES: u64 = 500 * 1024 * 1024;

/// Longest TTL an entry is held with (about 100 years).
///
/// Longer TTLs, such as a "never expires" hint, are cut down to this.
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A snapshot of one L1 entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// The entry's key.
    pub key: String,
    /// The cached bytes (always plaintext in L1).
    pub value: Vec<u8>,
    /// Wall-clock instant the entry expires, if it expires.
    pub absolute_expiry: Option<DateTime<Utc>>,
    /// TTL the entry was written with.
    pub ttl: Option<Duration>,
    /// Weight used for eviction accounting.
    pub size_bytes: u64,
}

/// Value stored in moka: the payload plus the TTL it was written with.
#[derive(Clone, Debug)]
struct L1Value {
    data: Arc<Vec<u8>>,
    ttl: Option<Duration>,
    absolute_expiry: Option<DateTime<Utc>>,
}

/// Expiry policy: each entry lives for exactly the TTL it was written with.
struct PerEntryExpiry;

impl Expiry<String, L1Value> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &L1Value,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &L1Value,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }

    // Reads keep the default behaviour (remaining duration unchanged), so a
    // hit never resets the entry's clock.
}

/// Hit/miss counters for the L1 store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L1Stats {
    /// Lookups served from L1.
    pub hits: u64,
    /// Lookups that missed L1.
    pub misses: u64,
    /// Current weighted size in bytes.
    pub size_bytes: u64,
    /// Current number of entries.
    pub entry_count: u64,
}

/// Bounded in-process cache for token blobs.
pub struct L1Store {
    cache: MokaCache<String, L1Value>,
    max_size_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl L1Store {
    /// Create a new L1 store.
    ///
    /// # Arguments
    ///
    /// * `max_size_bytes` - Eviction budget; entries are weighted by payload length
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            // Weight each entry by its payload size
            .weigher(|_key: &String, value: &L1Value| -> u32 {
                // moka uses u32 for weights, cap at u32::MAX for very large entries
                value.data.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .expire_after(PerEntryExpiry)
            .build();

        Self {
            cache,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up an entry, counting a hit or a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.cache.get(key).await {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((*value.data).clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inspect an entry without touching the hit/miss counters.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.cache.get(key).await.map(|value| CacheEntry {
            key: key.to_string(),
            size_bytes: value.data.len() as u64,
            value: (*value.data).clone(),
            absolute_expiry: value.absolute_expiry,
            ttl: value.ttl,
        })
    }

    /// Insert or overwrite an entry.
    ///
    /// `ttl` of `None` means the entry only leaves L1 through eviction or
    /// removal. TTLs above [`MAX_ENTRY_TTL`] are capped. Returns the recorded
    /// entry size.
    pub async fn insert(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> u64 {
        let size = data.len() as u64;
        let ttl = ttl.map(|ttl| ttl.min(MAX_ENTRY_TTL));
        let absolute_expiry = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|d| Utc::now().checked_add_signed(d));

        let value = L1Value {
            data: Arc::new(data),
            ttl,
            absolute_expiry,
        };
        self.cache.insert(key.to_string(), value).await;
        size
    }

    /// Remove an entry. Returns whether it was present.
    pub async fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    /// Check if a key exists (expired entries count as absent).
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Run pending maintenance (eviction, expiry, counter sync).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Current weighted size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Current number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Configured eviction budget.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Counter snapshot.
    pub fn stats(&self) -> L1Stats {
        L1Stats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size_bytes: self.size_bytes(),
            entry_count: self.entry_count(),
        }
    }
}

impl std::fmt::Debug for L1Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L1Store")
            .field("max_size_bytes", &self.max_size_bytes)
            .field("entry_count", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}
