//! Connection pool settings.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required |
//! | `DATABASE_MAX_CONNECTIONS` | 10 |
//! | `DATABASE_CONNECT_TIMEOUT_SECS` | 5 |

use lodgebook_core::persistence::PersistenceError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Invalid or missing connection settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostgresConfigError {
    /// `DATABASE_URL` is not set.
    #[error("DATABASE_URL is not set")]
    MissingUrl,

    /// A numeric variable could not be parsed.
    #[error("{var} must be a positive integer, got {value:?}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },
}

/// Settings for the `PostgreSQL` pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection string
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub connect_timeout: Duration,
}

impl PostgresConfig {
    /// Settings for `url` with default pool limits.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresConfigError`] if `DATABASE_URL` is missing or a
    /// numeric variable is not a positive integer.
    pub fn from_env() -> Result<Self, PostgresConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`PostgresConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PostgresConfigError> {
        let url = lookup("DATABASE_URL").ok_or(PostgresConfigError::MissingUrl)?;
        let mut config = Self::new(url);

        if let Some(max) = positive(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = u32::try_from(max).map_err(|_| PostgresConfigError::Invalid {
                var: "DATABASE_MAX_CONNECTIONS",
                value: max.to_string(),
            })?;
        }
        if let Some(secs) = positive(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] if the database is unreachable.
    pub async fn connect(&self) -> Result<PgPool, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .connect(&self.url)
            .await
            .map_err(crate::database_error)?;
        tracing::info!(max_connections = self.max_connections, "Connected to PostgreSQL");
        Ok(pool)
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, PostgresConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(PostgresConfigError::Invalid { var, value: raw }),
    }
}
