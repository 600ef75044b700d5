//! tokencache - Two-level cache for authentication token blobs
//!
//! This library keeps serialized token caches in a fast in-process L1 store
//! backed by a durable remote L2 store, so clients do not re-acquire tokens
//! on every call.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                  TokenCacheAdapter                     │
//! │                                                        │
//! │  read / write / remove (+ default-hint overloads)      │
//! └──────┬───────────────────┬────────────────────┬────────┘
//!        │                   │                    │
//!        ▼                   ▼                    ▼
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │   L1Store   │   │ RetryCoordinator │   │ PayloadProtector │
//! │   (moka)    │   │  (policy, once)  │   │   (optional)     │
//! └─────────────┘   └────────┬─────────┘   └──────────────────┘
//!                            ▼
//!                   ┌──────────────────┐
//!                   │ Arc<dyn L2Cache> │
//!                   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokencache::{AdapterConfig, CacheKey, InMemoryL2Cache, RetryTransient, TokenCacheAdapter};
//!
//! let adapter = TokenCacheAdapter::builder(Arc::new(InMemoryL2Cache::new()))
//!     .config(
//!         AdapterConfig::default()
//!             .with_l2_absolute_expiration(Duration::from_secs(3600))
//!             .with_l1_expiration_ratio(0.5)
//!             .with_failure_policy(Arc::new(RetryTransient)),
//!     )
//!     .build()?;
//!
//! let key = CacheKey::app("my-client-id");
//! adapter.write_default(&key, serialized_cache).await?;
//! let cached = adapter.read_default(&key).await?;
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod hints;
pub mod key;
pub mod l1;
pub mod l2;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod protector;
pub mod retry;

pub use adapter::{L2Status, TokenCacheAdapter, TokenCacheAdapterBuilder, MIN_L1_TTL};
pub use config::AdapterConfig;
pub use error::{CacheError, CacheResult, ConfigError, L2Error, ProtectorError};
pub use events::{CacheEvent, CacheEventSink, L2Operation, MemoryEventSink, TracingEventSink};
pub use hints::SerializationHints;
pub use key::CacheKey;
pub use l1::{CacheEntry, L1Store};
pub use l2::{BoxFuture, InMemoryL2Cache, L2Cache, L2EntryOptions};
pub use metrics::CacheMetricsSnapshot;
pub use policy::{FnFailurePolicy, L2FailurePolicy, RetryAlways, RetryTransient};
pub use protector::{AesGcmProtectorProvider, PayloadProtector, ProtectorProvider, PROTECTOR_PURPOSE};
pub use retry::{Attempt, L2Outcome, RetryCoordinator};
