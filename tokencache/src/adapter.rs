//! Two-level token cache adapter.
//!
//! The adapter composes an owned [`L1Store`], a shared [`L2Cache`] and a
//! [`RetryCoordinator`] into read/write/remove operations:
//!
//! ```text
//!   read ──► L1 hit? ──yes──► return bytes, refresh L2 in background
//!              │
//!              no
//!              ▼
//!         RetryCoordinator ──► L2 get ──► unprotect ──► back-propagate to L1
//!
//!   write ─► protect ─► L1 upsert ─► RetryCoordinator ─► L2 set
//!
//!   remove ► L1 delete ─► RetryCoordinator ─► L2 remove
//! ```
//!
//! L2 is the source of truth. Losing L1 only costs latency, so L1 work is
//! best-effort and never reported as a failure; L2 failures are absorbed as
//! degraded results. Only cancellation and protector failures are raised.
//!
//! Background work (refresh on L1 hit, async L2 writes) is spawned on the
//! ambient tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::AdapterConfig;
use crate::error::{CacheError, CacheResult, ConfigError};
use crate::events::{CacheEvent, CacheEventSink, L2Operation, TracingEventSink};
use crate::hints::SerializationHints;
use crate::key::CacheKey;
use crate::l1::{L1Store, MAX_ENTRY_TTL};
use crate::l2::{L2Cache, L2EntryOptions};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::protector::{PayloadProtector, ProtectorProvider, PROTECTOR_PURPOSE};
use crate::retry::{L2Outcome, RetryCoordinator};

/// Smallest TTL ever given to an L1 entry.
pub const MIN_L1_TTL: Duration = Duration::from_millis(1);

/// How the remote tier reflected a write or remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2Status {
    /// L2 accepted the change.
    Applied,
    /// L2 failed for good; the change only reached L1 (if enabled).
    Degraded,
    /// The L2 write was handed to a background task.
    Deferred,
}

impl L2Status {
    /// Whether L2 is known to hold the change.
    pub fn is_applied(&self) -> bool {
        matches!(self, L2Status::Applied)
    }
}

impl<T> From<L2Outcome<T>> for L2Status {
    fn from(outcome: L2Outcome<T>) -> Self {
        match outcome {
            L2Outcome::Completed(_) => L2Status::Applied,
            L2Outcome::Degraded => L2Status::Degraded,
        }
    }
}

/// Per-key rate limit for refreshes triggered by L1 hits.
///
/// A key is held in the gate for `interval` after its last refresh; the
/// moka TTL drops it afterwards, so keys that go quiet cost nothing.
struct RefreshGate {
    recent: moka::sync::Cache<String, ()>,
}

impl RefreshGate {
    fn new(interval: Duration) -> Self {
        Self {
            recent: moka::sync::Cache::builder().time_to_live(interval).build(),
        }
    }

    /// Claim the right to refresh `key` now.
    fn try_acquire(&self, key: &str) -> bool {
        self.recent.entry(key.to_string()).or_insert(()).is_fresh()
    }

    fn forget(&self, key: &str) {
        self.recent.invalidate(key);
    }
}

/// Two-level (L1 in-process / L2 remote) token cache.
pub struct TokenCacheAdapter {
    /// Owned L1 store; `None` when L1 is disabled.
    l1: Option<L1Store>,
    l2: Arc<dyn L2Cache>,
    retry: RetryCoordinator,
    protector: Option<Arc<dyn PayloadProtector>>,
    events: Arc<dyn CacheEventSink>,
    metrics: Arc<CacheMetrics>,
    /// Default L1 TTL, precomputed at construction.
    l1_ttl: Option<Duration>,
    l2_options: L2EntryOptions,
    async_l2_write: bool,
    refresh_gate: Option<RefreshGate>,
}

impl TokenCacheAdapter {
    /// Create an adapter.
    ///
    /// # Arguments
    ///
    /// * `l2` - Remote store; shared, not owned
    /// * `config` - Adapter options
    /// * `events` - Sink for structured cache events
    /// * `protector_provider` - Consulted only when `config.encrypt` is set
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ExpirationRatioOutOfRange`] if an L2 absolute
    /// expiration is set and the ratio is outside `(0, 1]`. A missing
    /// protector never fails construction; protection is disabled and an
    /// event is emitted instead.
    pub fn new(
        l2: Arc<dyn L2Cache>,
        config: AdapterConfig,
        events: Arc<dyn CacheEventSink>,
        protector_provider: Option<&dyn ProtectorProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let l1 = (!config.disable_l1).then(|| L1Store::new(config.l1_size_limit_bytes));
        let l1_ttl = config.l1_ttl();

        let protector = if config.encrypt {
            Self::bind_protector(protector_provider, events.as_ref())
        } else {
            None
        };

        let metrics = Arc::new(CacheMetrics::new());
        let retry = RetryCoordinator::new(
            config.on_l2_failure.clone(),
            Arc::clone(&events),
            Arc::clone(&metrics),
        );

        info!(
            l1_enabled = l1.is_some(),
            l1_size_limit_bytes = config.l1_size_limit_bytes,
            l1_ttl_ms = l1_ttl.map(|t| t.as_millis() as u64),
            encrypted = protector.is_some(),
            async_l2_write = config.enable_async_l2_write,
            "Token cache adapter initialised"
        );

        Ok(Self {
            l1,
            l2,
            retry,
            protector,
            events,
            metrics,
            l1_ttl,
            l2_options: config.l2_entry_options(),
            async_l2_write: config.enable_async_l2_write,
            refresh_gate: config.l2_refresh_interval.map(RefreshGate::new),
        })
    }

    /// Start building an adapter over `l2` with default options.
    pub fn builder(l2: Arc<dyn L2Cache>) -> TokenCacheAdapterBuilder {
        TokenCacheAdapterBuilder {
            l2,
            config: AdapterConfig::default(),
            events: None,
            protector_provider: None,
        }
    }

    fn bind_protector(
        provider: Option<&dyn ProtectorProvider>,
        events: &dyn CacheEventSink,
    ) -> Option<Arc<dyn PayloadProtector>> {
        let reason = match provider {
            Some(provider) => match provider.create_protector(PROTECTOR_PURPOSE) {
                Some(protector) => return Some(protector),
                None => "protector provider returned no protector",
            },
            None => "no protector provider registered",
        };

        events.emit(CacheEvent::ProtectionDisabled {
            reason: reason.to_string(),
        });
        None
    }

    /// Read the bytes cached at `key`.
    ///
    /// L1 is consulted first; a hit returns immediately and refreshes the
    /// remote entry in the background. A miss reads L2 and copies any value
    /// found back into L1. A degraded L2 read looks like a miss.
    ///
    /// # Errors
    ///
    /// [`CacheError::Cancelled`] if the hints' token fires,
    /// [`CacheError::Protector`] if the L2 payload cannot be decrypted.
    pub async fn read(
        &self,
        key: &CacheKey,
        hints: &SerializationHints,
    ) -> CacheResult<Option<Vec<u8>>> {
        if hints.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        if let Some(l1) = &self.l1 {
            if let Some(bytes) = l1.get(key.as_str()).await {
                self.metrics.l1_hit();
                self.events.emit(CacheEvent::L1Hit {
                    key: key.to_string(),
                    size_bytes: bytes.len() as u64,
                });
                self.spawn_refresh(key, hints);
                return Ok(Some(bytes));
            }
        }

        self.metrics.l1_miss();
        self.events.emit(CacheEvent::L1Miss {
            key: key.to_string(),
        });

        let l2 = self.l2.as_ref();
        let k = key.as_str();
        let cancel = &hints.cancellation;
        let outcome = self
            .retry
            .execute(L2Operation::Read, k, cancel, || l2.get(k, cancel))
            .await?;

        let Some(stored) = outcome.completed().flatten() else {
            return Ok(None);
        };

        let bytes = match &self.protector {
            Some(protector) => protector.unprotect(&stored)?,
            None => stored,
        };

        if let Some(l1) = &self.l1 {
            let ttl = self.effective_l1_ttl(key, hints);
            let size_bytes = l1.insert(k, bytes.clone(), ttl).await;
            self.metrics.back_propagated();
            self.events.emit(CacheEvent::BackPropagated {
                key: key.to_string(),
                size_bytes,
                ttl,
            });
        }

        Ok(Some(bytes))
    }

    /// Write `bytes` at `key` in both tiers.
    ///
    /// The result reflects L2 only. L1 is updated unconditionally
    /// (last writer wins) and its outcome is never reported.
    ///
    /// # Errors
    ///
    /// [`CacheError::Cancelled`] if the hints' token fires,
    /// [`CacheError::Protector`] if encryption fails (nothing is written).
    pub async fn write(
        &self,
        key: &CacheKey,
        bytes: Vec<u8>,
        hints: &SerializationHints,
    ) -> CacheResult<L2Status> {
        if hints.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let payload = match &self.protector {
            Some(protector) => protector.protect(&bytes)?,
            None => bytes.clone(),
        };

        if let Some(l1) = &self.l1 {
            let ttl = self.effective_l1_ttl(key, hints);
            l1.insert(key.as_str(), bytes, ttl).await;
        }

        if self.async_l2_write {
            self.spawn_write(key, payload, hints);
            return Ok(L2Status::Deferred);
        }

        let l2 = self.l2.as_ref();
        let k = key.as_str();
        let cancel = &hints.cancellation;
        let options = self.l2_options;
        let outcome = self
            .retry
            .execute(L2Operation::Write, k, cancel, || {
                l2.set(k, payload.clone(), options, cancel)
            })
            .await?;

        Ok(outcome.into())
    }

    /// Remove `key` from both tiers. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// [`CacheError::Cancelled`] if the hints' token fires.
    pub async fn remove(&self, key: &CacheKey, hints: &SerializationHints) -> CacheResult<L2Status> {
        if hints.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        if let Some(l1) = &self.l1 {
            l1.remove(key.as_str()).await;
        }
        if let Some(gate) = &self.refresh_gate {
            gate.forget(key.as_str());
        }

        let l2 = self.l2.as_ref();
        let k = key.as_str();
        let cancel = &hints.cancellation;
        let outcome = self
            .retry
            .execute(L2Operation::Remove, k, cancel, || l2.remove(k, cancel))
            .await?;

        Ok(outcome.into())
    }

    /// [`read`](Self::read) with default hints.
    pub async fn read_default(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        self.read(key, &SerializationHints::default()).await
    }

    /// [`write`](Self::write) with default hints.
    pub async fn write_default(&self, key: &CacheKey, bytes: Vec<u8>) -> CacheResult<L2Status> {
        self.write(key, bytes, &SerializationHints::default()).await
    }

    /// [`remove`](Self::remove) with default hints.
    pub async fn remove_default(&self, key: &CacheKey) -> CacheResult<L2Status> {
        self.remove(key, &SerializationHints::default()).await
    }

    /// The L1 store, if enabled.
    pub fn l1(&self) -> Option<&L1Store> {
        self.l1.as_ref()
    }

    /// Default L1 TTL derived from the configuration.
    pub fn l1_ttl(&self) -> Option<Duration> {
        self.l1_ttl
    }

    /// Whether L2 payloads are encrypted.
    pub fn is_protected(&self) -> bool {
        self.protector.is_some()
    }

    /// Snapshot of the adapter counters.
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// L1 expiry for this call: the hinted expiry if any, else the default.
    ///
    /// A hinted expiry at or before now is clamped to [`MIN_L1_TTL`]; one
    /// beyond [`MAX_ENTRY_TTL`] is capped to it.
    fn effective_l1_ttl(&self, key: &CacheKey, hints: &SerializationHints) -> Option<Duration> {
        let Some(expiry) = hints.suggested_expiry else {
            return self.l1_ttl;
        };

        let remaining = expiry - Utc::now();
        match remaining.to_std() {
            Ok(ttl) if !ttl.is_zero() => Some(ttl.clamp(MIN_L1_TTL, MAX_ENTRY_TTL)),
            _ => {
                let overdue = (-remaining).to_std().unwrap_or_default();
                self.events.emit(CacheEvent::NegativeExpiryClamped {
                    key: key.to_string(),
                    overdue,
                });
                Some(MIN_L1_TTL)
            }
        }
    }

    /// Refresh the remote entry after an L1 hit, without blocking the caller.
    fn spawn_refresh(&self, key: &CacheKey, hints: &SerializationHints) {
        if let Some(gate) = &self.refresh_gate {
            if !gate.try_acquire(key.as_str()) {
                self.metrics.refresh_skipped();
                self.events.emit(CacheEvent::RefreshSkipped {
                    key: key.to_string(),
                });
                return;
            }
        }

        let l2 = Arc::clone(&self.l2);
        let retry = self.retry.clone();
        let key = key.to_string();
        let cancel = hints.cancellation.clone();

        tokio::spawn(async move {
            let result = retry
                .execute(L2Operation::Refresh, &key, &cancel, || {
                    l2.refresh(&key, &cancel)
                })
                .await;
            if let Err(e) = result {
                debug!(key = %key, error = %e, "Background L2 refresh abandoned");
            }
        });
    }

    /// Hand an L2 write to a background task.
    fn spawn_write(&self, key: &CacheKey, payload: Vec<u8>, hints: &SerializationHints) {
        let l2 = Arc::clone(&self.l2);
        let retry = self.retry.clone();
        let key = key.to_string();
        let cancel = hints.cancellation.clone();
        let options = self.l2_options;

        tokio::spawn(async move {
            let result = retry
                .execute(L2Operation::Write, &key, &cancel, || {
                    l2.set(&key, payload.clone(), options, &cancel)
                })
                .await;
            if let Err(e) = result {
                debug!(key = %key, error = %e, "Background L2 write abandoned");
            }
        });
    }
}

impl std::fmt::Debug for TokenCacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCacheAdapter")
            .field("l1", &self.l1)
            .field("l1_ttl", &self.l1_ttl)
            .field("l2_options", &self.l2_options)
            .field("protected", &self.protector.is_some())
            .field("async_l2_write", &self.async_l2_write)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TokenCacheAdapter`].
pub struct TokenCacheAdapterBuilder {
    l2: Arc<dyn L2Cache>,
    config: AdapterConfig,
    events: Option<Arc<dyn CacheEventSink>>,
    protector_provider: Option<Arc<dyn ProtectorProvider>>,
}

impl TokenCacheAdapterBuilder {
    /// Use these options.
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Send events to `events` instead of `tracing`.
    pub fn events(mut self, events: Arc<dyn CacheEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register the protector provider consulted when encryption is enabled.
    pub fn protector_provider(mut self, provider: Arc<dyn ProtectorProvider>) -> Self {
        self.protector_provider = Some(provider);
        self
    }

    /// Build the adapter.
    pub fn build(self) -> Result<TokenCacheAdapter, ConfigError> {
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEventSink) as Arc<dyn CacheEventSink>);
        TokenCacheAdapter::new(
            self.l2,
            self.config,
            events,
            self.protector_provider.as_deref(),
        )
    }
}
