//! L2 client abstraction over a remote key-value store.
//!
//! The `L2Cache` trait is the seam between the adapter and whatever remote
//! cache the host provides (Redis, SQL, a cloud cache service). Every call
//! receives the caller's cancellation token and must stop its I/O when the
//! token fires, reporting [`L2Error::Cancelled`].
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the adapter can hold an
//! `Arc<dyn L2Cache>` supplied at runtime.
//!
//! [`InMemoryL2Cache`] is a process-local implementation with the same
//! expiration semantics as a distributed cache. It is meant for local
//! development and tests, where no remote store is available.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::L2Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote-side expiration applied on every `set`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L2EntryOptions {
    /// Entry expires this long after it was written.
    pub absolute_expiration: Option<Duration>,
    /// Entry expires if not read or refreshed within this window.
    pub sliding_expiration: Option<Duration>,
}

/// Remote key-value store used as the durable tier.
pub trait L2Cache: Send + Sync {
    /// Fetch the bytes stored at `key`, or `None` if absent.
    fn get<'a>(
        &'a self,
        key: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, L2Error>>;

    /// Store bytes at `key`, replacing any previous value.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        options: L2EntryOptions,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), L2Error>>;

    /// Delete `key`. Deleting an absent key succeeds.
    fn remove<'a>(
        &'a self,
        key: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), L2Error>>;

    /// Extend the entry's sliding expiration without touching its bytes.
    fn refresh<'a>(
        &'a self,
        key: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), L2Error>>;
}

#[derive(Clone, Debug)]
struct StoredEntry {
    value: Vec<u8>,
    /// Hard deadline from the absolute expiration.
    absolute_deadline: Option<Instant>,
    sliding: Option<Duration>,
    /// Deadline from the sliding window, pushed out by reads and refreshes.
    sliding_deadline: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.absolute_deadline.is_some_and(|d| now >= d)
            || self.sliding_deadline.is_some_and(|d| now >= d)
    }

    fn slide(&mut self, now: Instant) {
        if let Some(window) = self.sliding {
            // A window too large for an Instant behaves like no window
            let next = now.checked_add(window);
            // Sliding never outlives the absolute deadline
            self.sliding_deadline = match (next, self.absolute_deadline) {
                (Some(next), Some(hard)) => Some(next.min(hard)),
                (next, hard) => next.or(hard),
            };
        }
    }
}

/// In-process L2 implementation with distributed-cache expiration semantics.
#[derive(Debug, Default)]
pub struct InMemoryL2Cache {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryL2Cache {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.slide(now);
                return Some(entry.value.clone());
            }
        }
        self.evict_expired(key, now);
        None
    }

    fn touch(&self, key: &str) {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.slide(now);
                return;
            }
        }
        self.evict_expired(key, now);
    }

    /// Remove `key` only if it is still expired as of `now`.
    ///
    /// The shard lock is released between the expiry check and the removal,
    /// so a value written in between must survive.
    fn evict_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn write(&self, key: &str, value: Vec<u8>, options: L2EntryOptions) {
        let now = Instant::now();
        let mut entry = StoredEntry {
            value,
            absolute_deadline: options
                .absolute_expiration
                .and_then(|ttl| now.checked_add(ttl)),
            sliding: options.sliding_expiration,
            sliding_deadline: None,
        };
        entry.slide(now);
        self.entries.insert(key.to_string(), entry);
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), L2Error> {
    if cancel.is_cancelled() {
        Err(L2Error::Cancelled)
    } else {
        Ok(())
    }
}

impl L2Cache for InMemoryL2Cache {
    fn get<'a>(
        &'a self,
        key: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, L2Error>> {
        Box::pin(async move {
            ensure_not_cancelled(cancel)?;
            Ok(self.read(key))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        options: L2EntryOptions,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), L2Error>> {
        Box::pin(async move {
            ensure_not_cancelled(cancel)?;
            self.write(key, value, options);
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        key: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), L2Error>> {
        Box::pin(async move {
            ensure_not_cancelled(cancel)?;
            self.entries.remove(key);
            Ok(())
        })
    }

    fn refresh<'a>(
        &'a self,
        key: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), L2Error>> {
        Box::pin(async move {
            ensure_not_cancelled(cancel)?;
            self.touch(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_set_and_get() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();

        store
            .set("acct1", vec![1, 2, 3], L2EntryOptions::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(
            store.get("acct1", &cancel).await.unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_in_memory_remove_missing_succeeds() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();

        store.remove("nothing", &cancel).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_absolute_expiration() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        let options = L2EntryOptions {
            absolute_expiration: Some(Duration::from_millis(30)),
            sliding_expiration: None,
        };

        store.set("acct1", vec![1], options, &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get("acct1", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_refresh_extends_sliding_window() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        let options = L2EntryOptions {
            absolute_expiration: None,
            sliding_expiration: Some(Duration::from_millis(80)),
        };

        store.set("acct1", vec![1], options, &cancel).await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            store.refresh("acct1", &cancel).await.unwrap();
        }

        assert!(store.get("acct1", &cancel).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_in_memory_sliding_capped_by_absolute() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        let options = L2EntryOptions {
            absolute_expiration: Some(Duration::from_millis(60)),
            sliding_expiration: Some(Duration::from_millis(50)),
        };

        store.set("acct1", vec![1], options, &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.refresh("acct1", &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("acct1", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_honours_cancellation() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.get("acct1", &cancel).await;
        assert!(matches!(result, Err(L2Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_in_memory_purge_expired() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        let short = L2EntryOptions {
            absolute_expiration: Some(Duration::from_millis(10)),
            sliding_expiration: None,
        };

        store.set("a", vec![1], short, &cancel).await.unwrap();
        store
            .set("b", vec![2], L2EntryOptions::default(), &cancel)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_eviction_spares_concurrent_rewrite() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        let short = L2EntryOptions {
            absolute_expiration: Some(Duration::from_millis(10)),
            sliding_expiration: None,
        };

        store.set("acct1", vec![1], short, &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A reader saw the entry expired at `seen_at`, then a writer got in
        // before the reader evicted it
        let seen_at = Instant::now();
        store
            .set("acct1", vec![2], L2EntryOptions::default(), &cancel)
            .await
            .unwrap();
        store.evict_expired("acct1", seen_at);

        assert_eq!(store.get("acct1", &cancel).await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_in_memory_huge_expirations_mean_no_deadline() {
        let store = InMemoryL2Cache::new();
        let cancel = CancellationToken::new();
        let huge = L2EntryOptions {
            absolute_expiration: Some(Duration::from_secs(u64::MAX / 2)),
            sliding_expiration: Some(Duration::MAX),
        };

        store.set("acct1", vec![1], huge, &cancel).await.unwrap();
        store.refresh("acct1", &cancel).await.unwrap();

        assert_eq!(store.get("acct1", &cancel).await.unwrap(), Some(vec![1]));
    }
}
