//! Logging bootstrap for hosts embedding the token cache.
//!
//! The library itself only emits `tracing` events. Hosts without their own
//! subscriber can call [`init_logging`] once at startup to get formatted
//! output on stderr, or in a daily-rotated file when a directory is given.
//!
//! Configuration comes from the `[logging]` INI section:
//!
//! ```ini
//! [logging]
//! level = tokencache=debug,info
//! directory = /var/log/myapp
//! file_prefix = tokencache.log
//! ```

use std::path::PathBuf;

use ini::Ini;
use thiserror::Error;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

/// INI section holding logging options.
pub const LOGGING_SECTION: &str = "logging";

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log file prefix.
pub const DEFAULT_FILE_PREFIX: &str = "tokencache.log";

/// Errors from logging initialisation.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive could not be parsed.
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// A global subscriber is already installed.
    #[error("Logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Logging options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub filter: String,

    /// Write to daily-rotated files here instead of stderr.
    pub directory: Option<PathBuf>,

    /// File name prefix inside `directory`.
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl LoggingConfig {
    /// Read the `[logging]` section; a missing section yields the defaults.
    pub fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::default();
        if let Some(section) = ini.section(Some(LOGGING_SECTION)) {
            if let Some(level) = section.get("level") {
                config.filter = level.trim().to_string();
            }
            if let Some(dir) = section.get("directory") {
                config.directory = Some(PathBuf::from(dir.trim()));
            }
            if let Some(prefix) = section.get("file_prefix") {
                config.file_prefix = prefix.trim().to_string();
            }
        }
        config
    }

    /// Build the effective filter, preferring `RUST_LOG`.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter).map_err(|e| LoggingError::InvalidFilter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the background writer.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard, LoggingError> {
    let filter = config.env_filter()?;
    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let (writer, guard, ansi) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, false)
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, true)
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))?;

    Ok(guard)
}
