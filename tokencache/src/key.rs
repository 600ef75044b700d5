//! Cache keys for token-cache entries.
//!
//! A key is an opaque string naming one cached blob. Two conventional shapes
//! exist, mirroring how token caches are partitioned:
//!
//! - Per account: the account identifier itself (e.g. `"uid.utid"`)
//! - Per application: `"{client_id}_AppTokenCache"`
//!
//! Keys are strings so they stay readable in logs and map directly onto any
//! remote store's key space.

use std::borrow::Borrow;
use std::fmt;

/// Suffix appended to a client id for application-level token caches.
pub const APP_TOKEN_CACHE_SUFFIX: &str = "_AppTokenCache";

/// Identifies one cached entry in both tiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a per-account cache partition.
    pub fn account(account_id: &str) -> Self {
        Self(account_id.to_string())
    }

    /// Key for a per-application cache partition.
    ///
    /// Format: `{client_id}_AppTokenCache`.
    pub fn app(client_id: &str) -> Self {
        Self(format!("{}{}", client_id, APP_TOKEN_CACHE_SUFFIX))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names an application-level partition.
    pub fn is_app_key(&self) -> bool {
        self.0.ends_with(APP_TOKEN_CACHE_SUFFIX)
    }

    /// Consume the key, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
