//! `PostgreSQL` persistence for Lodgebook.
//!
//! Implements the `BookingStore` and `OutboxStore` traits from
//! `lodgebook-core` on top of sqlx:
//!
//! - Apartments and bookings with optimistic concurrency on a `version` column
//! - Aggregate rows and outbox rows written in one transaction per commit
//! - Outbox claims held as row locks (`FOR UPDATE SKIP LOCKED`) so several
//!   dispatchers can share one table without delivering a message twice
//! - Outbox inserts serialized by a transaction-scoped advisory lock so
//!   sequence order matches commit order
//!
//! # Example
//!
//! ```ignore
//! use lodgebook_postgres::{PostgresBookingStore, PostgresConfig, PostgresOutboxStore};
//!
//! let pool = PostgresConfig::from_env()?.connect().await?;
//! lodgebook_postgres::run_migrations(&pool).await?;
//!
//! let bookings = PostgresBookingStore::new(pool.clone());
//! let outbox = PostgresOutboxStore::new(pool);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use lodgebook_core::persistence::PersistenceError;
use sqlx::PgPool;
use sqlx::migrate::Migrator;

/// Apartment and booking tables
pub mod booking_store;

/// Connection settings from the environment
pub mod config;

/// Outbox table and claims
pub mod outbox_store;

pub use booking_store::{OUTBOX_WRITE_LOCK, PostgresBookingStore};
pub use config::{PostgresConfig, PostgresConfigError};
pub use outbox_store::{PgClaimedBatch, PostgresOutboxStore};

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations.
///
/// # Errors
///
/// Returns [`PersistenceError::Database`] if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), PersistenceError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

pub(crate) fn database_error(error: sqlx::Error) -> PersistenceError {
    PersistenceError::Database(error.to_string())
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
