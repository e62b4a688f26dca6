//! Dispatcher configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `OUTBOX_BATCH_SIZE` | `10` | Messages claimed per tick |
//! | `OUTBOX_POLL_INTERVAL_MS` | `10000` | Time between ticks |

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the batch size.
pub const BATCH_SIZE_VAR: &str = "OUTBOX_BATCH_SIZE";

/// Environment variable holding the poll interval in milliseconds.
pub const POLL_INTERVAL_VAR: &str = "OUTBOX_POLL_INTERVAL_MS";

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The value is not a number.
    #[error("{var} must be a positive integer, got {value:?}")]
    NotANumber {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },

    /// The value is zero.
    #[error("{var} must be greater than zero")]
    Zero {
        /// Variable name
        var: &'static str,
    },
}

/// Outbox dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    batch_size: usize,
    poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl DispatcherConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to a non-number or zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load through `lookup`, which returns a variable's value if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to a non-number or zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(batch_size) = positive(BATCH_SIZE_VAR, lookup(BATCH_SIZE_VAR))? {
            config.batch_size = usize::try_from(batch_size).unwrap_or(usize::MAX);
        }
        if let Some(millis) = positive(POLL_INTERVAL_VAR, lookup(POLL_INTERVAL_VAR))? {
            config.poll_interval = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// Set the batch size. Zero is raised to one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the poll interval. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Messages claimed per tick.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Time between ticks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

fn positive(var: &'static str, raw: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::NotANumber {
            var,
            value: raw.clone(),
        })?;
    if value == 0 {
        return Err(ConfigError::Zero { var });
    }
    Ok(Some(value))
}
