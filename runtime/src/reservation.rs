//! Reservation command service.
//!
//! Each command follows the same shape:
//!
//! ```text
//! load aggregates ─► domain decision ─► UnitOfWork::commit (aggregates + outbox, one tx)
//! ```
//!
//! The service never delivers events itself; subscribers only see them once
//! the [`OutboxDispatcher`](crate::dispatcher::OutboxDispatcher) picks up the
//! committed outbox rows.
//!
//! # Concurrency
//!
//! Two reservations for the same apartment can both pass the overlap check
//! before either commits. Both touch the apartment row, so only the first
//! commit wins; the other fails with [`CommandError::Concurrency`] and nothing
//! of it is persisted. Callers may retry, at which point the overlap check
//! sees the winner's booking.

use crate::metrics::ReservationMetrics;
use lodgebook_core::environment::Clock;
use lodgebook_core::persistence::{BookingStore, CommitError, PersistenceError};
use lodgebook_core::{
    ApartmentId, Booking, BookingError, BookingId, DateRange, PricingPolicy, ReservationConflict,
    UnitOfWork, UserId,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Request to reserve a period at an apartment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReserveBooking {
    /// Apartment to book
    pub apartment_id: ApartmentId,
    /// Guest
    pub user_id: UserId,
    /// Nights requested
    pub period: DateRange,
}

/// Why a command did not take effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The apartment does not exist.
    #[error("Apartment not found: {0}")]
    ApartmentNotFound(ApartmentId),

    /// The booking does not exist.
    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    /// The period overlaps an active booking.
    #[error(transparent)]
    Conflict(#[from] ReservationConflict),

    /// The booking is not in a status that allows the transition.
    #[error(transparent)]
    InvalidTransition(#[from] BookingError),

    /// Another writer changed an aggregate first.
    #[error("Concurrent modification of {aggregate} {id}")]
    Concurrency {
        /// Aggregate kind
        aggregate: &'static str,
        /// Aggregate identifier
        id: String,
    },

    /// The store failed; nothing was written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CommandError {
    /// Stable reason code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ApartmentNotFound(_) => "Apartment.NotFound",
            Self::BookingNotFound(_) => "Booking.NotFound",
            Self::Conflict(conflict) => conflict.code(),
            Self::InvalidTransition(err) => err.code(),
            Self::Concurrency { .. } => "Concurrency",
            Self::Persistence(_) => "Persistence",
        }
    }

    /// Message safe to show a user. Infrastructure detail stays in the logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ApartmentNotFound(_) => "The apartment was not found".to_string(),
            Self::BookingNotFound(_) => "The booking was not found".to_string(),
            Self::Conflict(_) => "The apartment is already booked for those dates".to_string(),
            Self::InvalidTransition(err) => err.to_string(),
            Self::Concurrency { .. } => "The booking was changed by someone else, please retry".to_string(),
            Self::Persistence(_) => "Something went wrong, please try again later".to_string(),
        }
    }

    /// Whether retrying the same command may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency { .. } | Self::Persistence(_))
    }
}

impl From<CommitError> for CommandError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Concurrency { aggregate, id, .. } => Self::Concurrency { aggregate, id },
            CommitError::Persistence(err) => Self::Persistence(err),
        }
    }
}

/// Booking commands over a [`BookingStore`].
#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn BookingStore>,
    pricing: Arc<dyn PricingPolicy>,
    clock: Arc<dyn Clock>,
}

impl ReservationService {
    /// Create a service.
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        pricing: Arc<dyn PricingPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            pricing,
            clock,
        }
    }

    /// Reserve a period at an apartment.
    ///
    /// # Errors
    ///
    /// - [`CommandError::ApartmentNotFound`] if the apartment does not exist
    /// - [`CommandError::Conflict`] if the period overlaps an active booking
    /// - [`CommandError::Concurrency`] if a concurrent reservation committed first
    /// - [`CommandError::Persistence`] if the store fails
    ///
    /// # Panics
    ///
    /// Panics if the apartment's price components use different currencies.
    pub async fn reserve(&self, command: ReserveBooking) -> Result<BookingId, CommandError> {
        let ReserveBooking {
            apartment_id,
            user_id,
            period,
        } = command;

        let mut apartment = self
            .store
            .load_apartment(apartment_id)
            .await
            .map_err(|e| self.persistence_fault("load apartment", e))?
            .ok_or(CommandError::ApartmentNotFound(apartment_id))?;

        let existing = self
            .store
            .overlapping_bookings(apartment_id, period)
            .await
            .map_err(|e| self.persistence_fault("query overlapping bookings", e))?;

        let now = self.clock.now();
        let mut booking = match Booking::reserve(
            &mut apartment,
            user_id,
            period,
            now,
            self.pricing.as_ref(),
            &existing,
        ) {
            Ok(booking) => booking,
            Err(conflict) => {
                info!(
                    apartment_id = %apartment_id,
                    period = %period,
                    conflicting_booking = %conflict.existing_booking,
                    "Reservation rejected: overlapping booking"
                );
                ReservationMetrics::record_conflict();
                return Err(conflict.into());
            }
        };

        let mut uow = UnitOfWork::new(now);
        uow.track_apartment(&mut apartment).track_booking(&mut booking);
        uow.commit(self.store.as_ref())
            .await
            .map_err(|e| self.commit_fault("reserve", e))?;

        info!(
            booking_id = %booking.id,
            apartment_id = %apartment_id,
            period = %period,
            total = %booking.price.total,
            "Booking reserved"
        );
        ReservationMetrics::record_reserved();
        Ok(booking.id)
    }

    /// Confirm a reserved booking.
    ///
    /// # Errors
    ///
    /// - [`CommandError::BookingNotFound`] if the booking does not exist
    /// - [`CommandError::InvalidTransition`] unless the booking is reserved
    /// - [`CommandError::Concurrency`] / [`CommandError::Persistence`] on commit
    pub async fn confirm(&self, booking_id: BookingId) -> Result<(), CommandError> {
        self.transition(booking_id, "confirmed", Booking::confirm).await
    }

    /// Reject a reserved booking.
    ///
    /// # Errors
    ///
    /// - [`CommandError::BookingNotFound`] if the booking does not exist
    /// - [`CommandError::InvalidTransition`] unless the booking is reserved
    /// - [`CommandError::Concurrency`] / [`CommandError::Persistence`] on commit
    pub async fn reject(&self, booking_id: BookingId) -> Result<(), CommandError> {
        self.transition(booking_id, "rejected", Booking::reject).await
    }

    /// Complete a confirmed booking.
    ///
    /// # Errors
    ///
    /// - [`CommandError::BookingNotFound`] if the booking does not exist
    /// - [`CommandError::InvalidTransition`] unless the booking is confirmed
    /// - [`CommandError::Concurrency`] / [`CommandError::Persistence`] on commit
    pub async fn complete(&self, booking_id: BookingId) -> Result<(), CommandError> {
        self.transition(booking_id, "completed", Booking::complete).await
    }

    /// Cancel a confirmed booking before its first night.
    ///
    /// # Errors
    ///
    /// - [`CommandError::BookingNotFound`] if the booking does not exist
    /// - [`CommandError::InvalidTransition`] unless the booking is confirmed and
    ///   not yet started
    /// - [`CommandError::Concurrency`] / [`CommandError::Persistence`] on commit
    pub async fn cancel(&self, booking_id: BookingId) -> Result<(), CommandError> {
        self.transition(booking_id, "cancelled", Booking::cancel).await
    }

    async fn transition(
        &self,
        booking_id: BookingId,
        to: &'static str,
        apply: fn(&mut Booking, chrono::DateTime<chrono::Utc>) -> Result<(), BookingError>,
    ) -> Result<(), CommandError> {
        let mut booking = self
            .store
            .load_booking(booking_id)
            .await
            .map_err(|e| self.persistence_fault("load booking", e))?
            .ok_or(CommandError::BookingNotFound(booking_id))?;

        let now = self.clock.now();
        if let Err(err) = apply(&mut booking, now) {
            info!(
                booking_id = %booking_id,
                status = %booking.status,
                reason = err.code(),
                "Booking transition refused"
            );
            return Err(err.into());
        }

        let mut uow = UnitOfWork::new(now);
        uow.track_booking(&mut booking);
        uow.commit(self.store.as_ref())
            .await
            .map_err(|e| self.commit_fault(to, e))?;

        info!(booking_id = %booking_id, status = to, "Booking transitioned");
        ReservationMetrics::record_transition(to);
        Ok(())
    }

    #[allow(clippy::unused_self)]
    fn persistence_fault(&self, operation: &'static str, err: PersistenceError) -> CommandError {
        error!(operation, error = %err, "Booking store failure");
        ReservationMetrics::record_persistence_error();
        CommandError::Persistence(err)
    }

    fn commit_fault(&self, operation: &'static str, err: CommitError) -> CommandError {
        match err {
            CommitError::Concurrency { .. } => {
                warn!(operation, error = %err, "Commit lost an optimistic concurrency race");
                ReservationMetrics::record_concurrency_conflict();
                err.into()
            }
            CommitError::Persistence(err) => self.persistence_fault(operation, err),
        }
    }
}
