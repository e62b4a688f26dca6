//! Persistence gateway for the booking domain.
//!
//! A [`BookingStore`] loads aggregates and commits a [`ChangeSet`] produced by
//! the [`UnitOfWork`](crate::unit_of_work::UnitOfWork). A commit is
//! all-or-nothing: aggregate rows and outbox rows become visible together or
//! not at all.
//!
//! # Optimistic Concurrency
//!
//! Every aggregate in a change set carries the version it was loaded at.
//!
//! - [`Version::INITIAL`]: the aggregate is new; insert it at version 1. An
//!   existing row with the same id is a conflict.
//! - Any other version: update only if the stored version still equals it,
//!   writing `version + 1`. A mismatch is a conflict.
//!
//! A conflict aborts the whole commit with [`CommitError::Concurrency`].
//!
//! # Cancellation
//!
//! Dropping a pending [`BookingStore::commit`] future must leave no partial
//! state behind. Transactional stores get this from rollback-on-drop.
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so services can hold `Arc<dyn BookingStore>`.

use crate::apartment::{Apartment, ApartmentId};
use crate::booking::{Booking, BookingId};
use crate::date_range::DateRange;
use crate::unit_of_work::ChangeSet;
use crate::version::Version;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed, sendable future returned by the store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Infrastructure fault while talking to the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into the domain.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Why a commit did not happen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// Another writer changed an aggregate since it was loaded.
    #[error("Concurrency conflict on {aggregate} {id}: expected version {expected}")]
    Concurrency {
        /// Aggregate kind (`"apartment"` or `"booking"`)
        aggregate: &'static str,
        /// Aggregate identifier
        id: String,
        /// Version the writer loaded
        expected: Version,
    },

    /// The store failed; nothing was written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CommitError {
    /// Build a conflict for an apartment.
    #[must_use]
    pub fn apartment_conflict(apartment: &Apartment) -> Self {
        Self::Concurrency {
            aggregate: "apartment",
            id: apartment.id.to_string(),
            expected: apartment.version,
        }
    }

    /// Build a conflict for a booking.
    #[must_use]
    pub fn booking_conflict(booking: &Booking) -> Self {
        Self::Concurrency {
            aggregate: "booking",
            id: booking.id.to_string(),
            expected: booking.version,
        }
    }
}

/// Storage for apartments, bookings and the outbox rows written with them.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// request handler.
pub trait BookingStore: Send + Sync {
    /// Load an apartment by id.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the store fails. A missing apartment is
    /// `Ok(None)`.
    fn load_apartment(
        &self,
        id: ApartmentId,
    ) -> BoxFuture<'_, Result<Option<Apartment>, PersistenceError>>;

    /// Load a booking by id. The returned booking has an empty event buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the store fails. A missing booking is
    /// `Ok(None)`.
    fn load_booking(&self, id: BookingId)
    -> BoxFuture<'_, Result<Option<Booking>, PersistenceError>>;

    /// Active bookings of `apartment_id` whose period overlaps `period`.
    ///
    /// Uses the half-open predicate `start < period.end && end > period.start`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the store fails.
    fn overlapping_bookings(
        &self,
        apartment_id: ApartmentId,
        period: DateRange,
    ) -> BoxFuture<'_, Result<Vec<Booking>, PersistenceError>>;

    /// Write every aggregate and outbox message in `changes` atomically.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// - [`CommitError::Concurrency`] if any version check fails
    /// - [`CommitError::Persistence`] if the store fails
    ///
    /// In both cases nothing from `changes` is visible afterwards.
    fn commit(&self, changes: ChangeSet) -> BoxFuture<'_, Result<usize, CommitError>>;
}
