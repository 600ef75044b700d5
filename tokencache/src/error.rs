//! Error types for the token cache.
//!
//! Only two kinds of error ever reach a caller of the adapter: configuration
//! errors (at construction) and protector errors (during read/write), plus
//! cooperative cancellation. L2 failures are absorbed by the retry
//! coordinator and surface as degraded results instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for adapter operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised to callers of the cache adapter.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid adapter configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload encryption or decryption failed.
    #[error("Payload protection failed: {0}")]
    Protector(#[from] ProtectorError),

    /// The caller cancelled the operation.
    #[error("Cache operation cancelled")]
    Cancelled,
}

/// Configuration errors. Fatal at construction, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `l1_expiration_ratio` outside `(0, 1]` while an L2 expiration is set.
    #[error("l1_expiration_ratio must be in (0, 1], got {ratio}")]
    ExpirationRatioOutOfRange { ratio: f64 },

    /// Failed to read or parse a configuration file.
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    /// A configuration value could not be parsed.
    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// Failures reported by an L2 client.
#[derive(Debug, Error)]
pub enum L2Error {
    /// The remote store could not be reached.
    #[error("L2 connection failed: {0}")]
    Connection(String),

    /// The remote store did not answer in time.
    #[error("L2 operation timed out: {0}")]
    Timeout(String),

    /// The L2 client observed the cancellation token.
    #[error("L2 operation cancelled")]
    Cancelled,

    /// Any other backend-specific failure.
    #[error("L2 backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl L2Error {
    /// Wrap an arbitrary backend error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        L2Error::Backend(err.into())
    }

    /// Connectivity and timeout failures are considered transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, L2Error::Connection(_) | L2Error::Timeout(_))
    }
}

/// Payload protector failures.
#[derive(Debug, Error)]
pub enum ProtectorError {
    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Decryption failed (wrong key, wrong purpose or tampered payload).
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// The payload is not a protected envelope this provider understands.
    #[error("Malformed protected payload: {0}")]
    Malformed(String),

    /// The envelope references a key that is not in the keyring.
    #[error("Unknown protection key '{0}'")]
    UnknownKey(String),
}
