//! Adapter configuration.
//!
//! `AdapterConfig` holds every recognised option of the two-level cache.
//! It can be built in code (`Default` plus `with_*` setters) or loaded from
//! the `[token_cache]` section of an INI file:
//!
//! ```ini
//! [token_cache]
//! disable_l1 = false
//! l1_size_limit = 500MB
//! l2_absolute_expiration = 1h
//! l2_sliding_expiration = 15m
//! l1_expiration_ratio = 0.5
//! retry_on_l2_failure = transient
//! encrypt = true
//! enable_async_l2_write = false
//! l2_refresh_interval = 30s
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::error::ConfigError;
use crate::l1::{DEFAULT_L1_SIZE_LIMIT_BYTES, MAX_ENTRY_TTL};
use crate::l2::L2EntryOptions;
use crate::policy::{L2FailurePolicy, RetryAlways, RetryTransient};

/// INI section holding the adapter options.
pub const CONFIG_SECTION: &str = "token_cache";

/// Default fraction of the L2 expiration used for L1 entries.
pub const DEFAULT_L1_EXPIRATION_RATIO: f64 = 1.0;

/// Recognised adapter options.
#[derive(Clone)]
pub struct AdapterConfig {
    /// Skip the L1 store entirely; every operation goes to L2.
    pub disable_l1: bool,

    /// L1 eviction budget in bytes.
    pub l1_size_limit_bytes: u64,

    /// TTL applied to L2 writes.
    pub l2_absolute_expiration: Option<Duration>,

    /// Sliding window applied to L2 writes; refreshes push it out.
    pub l2_sliding_expiration: Option<Duration>,

    /// Fraction of `l2_absolute_expiration` used as the L1 TTL.
    ///
    /// Must lie in `(0, 1]` whenever `l2_absolute_expiration` is set.
    pub l1_expiration_ratio: f64,

    /// Decides whether a failed L2 operation is retried once.
    pub on_l2_failure: Option<Arc<dyn L2FailurePolicy>>,

    /// Encrypt L2 payloads when a protector provider is available.
    pub encrypt: bool,

    /// Run L2 writes on a background task instead of awaiting them.
    pub enable_async_l2_write: bool,

    /// Minimum spacing between L2 refreshes triggered by L1 hits on one key.
    ///
    /// `None` refreshes on every L1 hit.
    pub l2_refresh_interval: Option<Duration>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            disable_l1: false,
            l1_size_limit_bytes: DEFAULT_L1_SIZE_LIMIT_BYTES,
            l2_absolute_expiration: None,
            l2_sliding_expiration: None,
            l1_expiration_ratio: DEFAULT_L1_EXPIRATION_RATIO,
            on_l2_failure: None,
            encrypt: false,
            enable_async_l2_write: false,
            l2_refresh_interval: None,
        }
    }
}

impl AdapterConfig {
    /// Disable the L1 store.
    pub fn with_l1_disabled(mut self) -> Self {
        self.disable_l1 = true;
        self
    }

    /// Set the L1 eviction budget.
    pub fn with_l1_size_limit(mut self, bytes: u64) -> Self {
        self.l1_size_limit_bytes = bytes;
        self
    }

    /// Set the L2 absolute expiration.
    pub fn with_l2_absolute_expiration(mut self, ttl: Duration) -> Self {
        self.l2_absolute_expiration = Some(ttl);
        self
    }

    /// Set the L2 sliding expiration.
    pub fn with_l2_sliding_expiration(mut self, window: Duration) -> Self {
        self.l2_sliding_expiration = Some(window);
        self
    }

    /// Set the L1/L2 expiration ratio.
    pub fn with_l1_expiration_ratio(mut self, ratio: f64) -> Self {
        self.l1_expiration_ratio = ratio;
        self
    }

    /// Install an L2 failure policy.
    pub fn with_failure_policy(mut self, policy: Arc<dyn L2FailurePolicy>) -> Self {
        self.on_l2_failure = Some(policy);
        self
    }

    /// Request L2 payload encryption.
    pub fn with_encryption(mut self) -> Self {
        self.encrypt = true;
        self
    }

    /// Write to L2 in the background.
    pub fn with_async_l2_write(mut self) -> Self {
        self.enable_async_l2_write = true;
        self
    }

    /// Rate-limit L2 refreshes per key.
    pub fn with_l2_refresh_interval(mut self, interval: Duration) -> Self {
        self.l2_refresh_interval = Some(interval);
        self
    }

    /// Check the ratio invariant and the duration bounds.
    ///
    /// The ratio only matters, and is only checked, when an L2 absolute
    /// expiration is configured. Every configured duration must be at most
    /// [`MAX_ENTRY_TTL`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("l2_absolute_expiration", self.l2_absolute_expiration),
            ("l2_sliding_expiration", self.l2_sliding_expiration),
            ("l2_refresh_interval", self.l2_refresh_interval),
        ];
        for (key, duration) in durations {
            if let Some(duration) = duration.filter(|d| *d > MAX_ENTRY_TTL) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: format!(
                        "{}s exceeds the {}s maximum",
                        duration.as_secs(),
                        MAX_ENTRY_TTL.as_secs()
                    ),
                });
            }
        }

        if self.l2_absolute_expiration.is_some() {
            let ratio = self.l1_expiration_ratio;
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::ExpirationRatioOutOfRange { ratio });
            }
        }
        Ok(())
    }

    /// Default L1 TTL: `l2_absolute_expiration * l1_expiration_ratio`.
    ///
    /// `None` when no L2 expiration is configured, or when the product is
    /// not a representable duration (only possible before `validate`).
    pub fn l1_ttl(&self) -> Option<Duration> {
        self.l2_absolute_expiration.and_then(|ttl| {
            Duration::try_from_secs_f64(ttl.as_secs_f64() * self.l1_expiration_ratio).ok()
        })
    }

    /// Remote expiration options used on every L2 write.
    pub fn l2_entry_options(&self) -> L2EntryOptions {
        L2EntryOptions {
            absolute_expiration: self.l2_absolute_expiration,
            sliding_expiration: self.l2_sliding_expiration,
        }
    }

    /// Load from the `[token_cache]` section of an INI file.
    ///
    /// A missing section yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Build from a parsed INI document.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        match ini.section(Some(CONFIG_SECTION)) {
            Some(section) => Self::from_section(section),
            None => Ok(Self::default()),
        }
    }

    fn from_section(section: &Properties) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = section.get("disable_l1") {
            config.disable_l1 = parse_bool("disable_l1", value)?;
        }
        if let Some(value) = section.get("l1_size_limit") {
            config.l1_size_limit_bytes = parse_size("l1_size_limit", value)?;
        }
        if let Some(value) = section.get("l2_absolute_expiration") {
            config.l2_absolute_expiration = Some(parse_duration("l2_absolute_expiration", value)?);
        }
        if let Some(value) = section.get("l2_sliding_expiration") {
            config.l2_sliding_expiration = Some(parse_duration("l2_sliding_expiration", value)?);
        }
        if let Some(value) = section.get("l1_expiration_ratio") {
            config.l1_expiration_ratio = value
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid("l1_expiration_ratio", value))?;
        }
        if let Some(value) = section.get("retry_on_l2_failure") {
            config.on_l2_failure = parse_policy(value)?;
        }
        if let Some(value) = section.get("encrypt") {
            config.encrypt = parse_bool("encrypt", value)?;
        }
        if let Some(value) = section.get("enable_async_l2_write") {
            config.enable_async_l2_write = parse_bool("enable_async_l2_write", value)?;
        }
        if let Some(value) = section.get("l2_refresh_interval") {
            config.l2_refresh_interval = Some(parse_duration("l2_refresh_interval", value)?);
        }

        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("disable_l1", &self.disable_l1)
            .field("l1_size_limit_bytes", &self.l1_size_limit_bytes)
            .field("l2_absolute_expiration", &self.l2_absolute_expiration)
            .field("l2_sliding_expiration", &self.l2_sliding_expiration)
            .field("l1_expiration_ratio", &self.l1_expiration_ratio)
            .field("on_l2_failure", &self.on_l2_failure.is_some())
            .field("encrypt", &self.encrypt)
            .field("enable_async_l2_write", &self.enable_async_l2_write)
            .field("l2_refresh_interval", &self.l2_refresh_interval)
            .finish()
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Parse a byte size such as `1048576`, `512KB`, `500MB`, `2GiB`.
///
/// Decimal and binary suffixes are both treated as powers of 1024.
pub fn parse_size(key: &str, value: &str) -> Result<u64, ConfigError> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let number: u64 = number.parse().map_err(|_| invalid(key, value))?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(invalid(key, value)),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(key, value))
}

/// Parse a duration such as `750ms`, `30s`, `15m`, `1h`. Bare numbers are seconds.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let number: u64 = number.parse().map_err(|_| invalid(key, value))?;
    let secs_per_unit = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(number)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(invalid(key, value)),
    };

    number
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(key, value))
}

fn parse_policy(value: &str) -> Result<Option<Arc<dyn L2FailurePolicy>>, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "none" | "never" => Ok(None),
        "transient" => Ok(Some(Arc::new(RetryTransient))),
        "always" => Ok(Some(Arc::new(RetryAlways))),
        _ => Err(invalid("retry_on_l2_failure", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::L2Error;

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();
        assert!(!config.disable_l1);
        assert_eq!(config.l1_size_limit_bytes, 500 * 1024 * 1024);
        assert_eq!(config.l1_expiration_ratio, 1.0);
        assert!(config.l1_ttl().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_l1_ttl_derivation() {
        let config = AdapterConfig::default()
            .with_l2_absolute_expiration(Duration::from_millis(3000))
            .with_l1_expiration_ratio(0.25);
        assert_eq!(config.l1_ttl(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_ratio_only_validated_with_l2_expiration() {
        let config = AdapterConfig::default().with_l1_expiration_ratio(5.0);
        assert!(config.validate().is_ok());

        let config = config.with_l2_absolute_expiration(Duration::from_secs(60));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExpirationRatioOutOfRange { ratio }) if ratio == 5.0
        ));
    }

    #[test]
    fn test_ratio_rejects_nan() {
        let config = AdapterConfig::default()
            .with_l2_absolute_expiration(Duration::from_secs(60))
            .with_l1_expiration_ratio(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_expiration_rejected_from_ini() {
        let ini = Ini::load_from_str(
            "[token_cache]\nl2_absolute_expiration = 18446744073709551615s\n",
        )
        .unwrap();

        assert!(matches!(
            AdapterConfig::from_ini(&ini),
            Err(ConfigError::InvalidValue { key, .. }) if key == "l2_absolute_expiration"
        ));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let huge = Duration::from_secs(u64::MAX / 2);

        let config = AdapterConfig::default().with_l2_sliding_expiration(huge);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "l2_sliding_expiration"
        ));

        let config = AdapterConfig::default().with_l2_refresh_interval(huge);
        assert!(config.validate().is_err());

        let config = AdapterConfig::default().with_l2_absolute_expiration(MAX_ENTRY_TTL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_l1_ttl_never_panics_before_validation() {
        let config = AdapterConfig::default()
            .with_l2_absolute_expiration(Duration::from_secs(u64::MAX))
            .with_l1_expiration_ratio(1.0);
        assert!(config.l1_ttl().is_none());

        let config = AdapterConfig::default()
            .with_l2_absolute_expiration(Duration::from_secs(60))
            .with_l1_expiration_ratio(-1.0);
        assert!(config.l1_ttl().is_none());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("k", "1024").unwrap(), 1024);
        assert_eq!(parse_size("k", "512KB").unwrap(), 512 * 1024);
        assert_eq!(parse_size("k", "500MB").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("k", "2 GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("k", "lots").is_err());
        assert!(parse_size("k", "5TB").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("k", "750ms").unwrap(),
            Duration::from_millis(750)
        );
        assert_eq!(parse_duration("k", "30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("k", "15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("k", "1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("k", "soon").is_err());
    }

    #[test]
    fn test_from_ini_section() {
        let ini = Ini::load_from_str(
            "[token_cache]\n\
             disable_l1 = true\n\
             l1_size_limit = 64MB\n\
             l2_absolute_expiration = 1h\n\
             l1_expiration_ratio = 0.5\n\
             retry_on_l2_failure = transient\n\
             encrypt = yes\n\
             l2_refresh_interval = 30s\n",
        )
        .unwrap();

        let config = AdapterConfig::from_ini(&ini).unwrap();
        assert!(config.disable_l1);
        assert_eq!(config.l1_size_limit_bytes, 64 * 1024 * 1024);
        assert_eq!(config.l1_ttl(), Some(Duration::from_secs(1800)));
        assert!(config.encrypt);
        assert_eq!(config.l2_refresh_interval, Some(Duration::from_secs(30)));

        let policy = config.on_l2_failure.unwrap();
        assert!(policy.should_retry(&L2Error::Timeout("t".into())));
    }

    #[test]
    fn test_from_ini_missing_section_is_default() {
        let ini = Ini::load_from_str("[logging]\nlevel = debug\n").unwrap();
        let config = AdapterConfig::from_ini(&ini).unwrap();
        assert!(!config.disable_l1);
    }

    #[test]
    fn test_from_ini_rejects_bad_ratio() {
        let ini = Ini::load_from_str(
            "[token_cache]\nl2_absolute_expiration = 10s\nl1_expiration_ratio = 0\n",
        )
        .unwrap();
        assert!(matches!(
            AdapterConfig::from_ini(&ini),
            Err(ConfigError::ExpirationRatioOutOfRange { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokencache.ini");
        std::fs::write(
            &path,
            "[token_cache]\nl2_absolute_expiration = 3000ms\nl1_expiration_ratio = 0.25\n",
        )
        .unwrap();

        let config = AdapterConfig::load(&path).unwrap();
        assert_eq!(config.l1_ttl(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AdapterConfig::load(Path::new("/nonexistent/tokencache.ini"));
        assert!(matches!(result, Err(ConfigError::LoadFailed { .. })));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_valid_ratio_derives_scaled_ttl(
                ratio in 0.0001..=1.0_f64,
                ttl_ms in 1u64..10_000_000
            ) {
                let config = AdapterConfig::default()
                    .with_l2_absolute_expiration(Duration::from_millis(ttl_ms))
                    .with_l1_expiration_ratio(ratio);

                prop_assert!(config.validate().is_ok());
                let expected = Duration::from_millis(ttl_ms).mul_f64(ratio);
                prop_assert_eq!(config.l1_ttl(), Some(expected));
            }

            #[test]
            fn test_out_of_range_ratio_rejected(
                ratio in prop_oneof![-10.0..=0.0_f64, 1.0001..10.0_f64]
            ) {
                let config = AdapterConfig::default()
                    .with_l2_absolute_expiration(Duration::from_secs(60))
                    .with_l1_expiration_ratio(ratio);

                prop_assert!(config.validate().is_err());
            }
        }
    }
}
