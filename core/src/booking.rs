//! The booking aggregate and the reservation engine.
//!
//! # Invariant
//!
//! For a given apartment, no two bookings whose status is `Reserved` or
//! `Confirmed` may have overlapping periods (half-open test, see
//! [`DateRange::overlaps`]).
//!
//! [`Booking::reserve`] enforces the invariant against the active bookings it
//! is handed; the caller is responsible for loading them (typically via
//! [`BookingStore::overlapping_bookings`](crate::persistence::BookingStore::overlapping_bookings))
//! and for committing the result through a
//! [`UnitOfWork`](crate::unit_of_work::UnitOfWork).
//!
//! # Lifecycle
//!
//! ```text
//! reserve ──► Reserved ──confirm──► Confirmed ──complete──► Completed
//!                │                      │
//!                └──reject──► Rejected  └──cancel──► Cancelled
//! ```
//!
//! Bookings are never deleted, only transitioned.

use crate::apartment::{Apartment, ApartmentId};
use crate::date_range::DateRange;
use crate::event::{DomainEvent, EventBuffer};
use crate::pricing::{PriceBreakdown, PricingPolicy};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `BookingId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a guest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Booking status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Held for the guest, awaiting confirmation
    Reserved,
    /// Confirmed by the host
    Confirmed,
    /// Rejected by the host
    Rejected,
    /// Stay finished
    Completed,
    /// Cancelled by the guest before the stay started
    Cancelled,
}

impl BookingStatus {
    /// Whether a booking in this status blocks its dates.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Reserved | Self::Confirmed)
    }

    /// Storage name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The requested period collides with an active booking.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Booking overlap: apartment {apartment_id} is already booked for {existing_period} by booking {existing_booking}")]
pub struct ReservationConflict {
    /// Apartment requested
    pub apartment_id: ApartmentId,
    /// Active booking the request collides with
    pub existing_booking: BookingId,
    /// Period of that booking
    pub existing_period: DateRange,
}

impl ReservationConflict {
    /// Reason code surfaced to users.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        "Booking.Overlap"
    }
}

/// A status transition was attempted from the wrong status.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingError {
    /// Only reserved bookings can be confirmed or rejected.
    #[error("Booking is not reserved (status: {0})")]
    NotReserved(BookingStatus),

    /// Only confirmed bookings can be completed or cancelled.
    #[error("Booking is not confirmed (status: {0})")]
    NotConfirmed(BookingStatus),

    /// The stay has already begun.
    #[error("Booking has already started")]
    AlreadyStarted,
}

impl BookingError {
    /// Reason code surfaced to users.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotReserved(_) => "Booking.NotReserved",
            Self::NotConfirmed(_) => "Booking.NotConfirmed",
            Self::AlreadyStarted => "Booking.AlreadyStarted",
        }
    }
}

/// Booking aggregate root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Apartment booked
    pub apartment_id: ApartmentId,
    /// Guest
    pub user_id: UserId,
    /// Nights booked
    pub period: DateRange,
    /// Price computed at reservation time
    pub price: PriceBreakdown,
    /// Current status
    pub status: BookingStatus,
    /// When the booking was reserved
    pub created_at: DateTime<Utc>,
    /// When the booking was confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the booking was rejected
    pub rejected_at: Option<DateTime<Utc>>,
    /// When the booking was completed
    pub completed_at: Option<DateTime<Utc>>,
    /// When the booking was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token
    pub version: Version,
    events: EventBuffer<DomainEvent>,
}

impl Booking {
    /// Reserve `period` at `apartment` for `user_id`.
    ///
    /// `existing` must contain every active booking of the apartment that may
    /// overlap `period`; extra bookings (other apartments, inactive, disjoint)
    /// are ignored. On success the apartment is marked as booked and the new
    /// booking holds exactly one buffered [`DomainEvent::BookingReserved`].
    ///
    /// # Errors
    ///
    /// Returns [`ReservationConflict`] naming the first colliding booking.
    ///
    /// # Panics
    ///
    /// Panics if the pricing policy combines amounts of different currencies.
    pub fn reserve(
        apartment: &mut Apartment,
        user_id: UserId,
        period: DateRange,
        now: DateTime<Utc>,
        pricing: &dyn PricingPolicy,
        existing: &[Self],
    ) -> Result<Self, ReservationConflict> {
        if let Some(conflict) = existing.iter().find(|booking| {
            booking.apartment_id == apartment.id
                && booking.status.is_active()
                && booking.period.overlaps(&period)
        }) {
            return Err(ReservationConflict {
                apartment_id: apartment.id,
                existing_booking: conflict.id,
                existing_period: conflict.period,
            });
        }

        let price = pricing.price(apartment, &period);
        apartment.mark_booked(now);

        let mut booking = Self {
            id: BookingId::new(),
            apartment_id: apartment.id,
            user_id,
            period,
            price,
            status: BookingStatus::Reserved,
            created_at: now,
            confirmed_at: None,
            rejected_at: None,
            completed_at: None,
            cancelled_at: None,
            version: Version::INITIAL,
            events: EventBuffer::new(),
        };
        booking.raise(DomainEvent::BookingReserved {
            booking_id: booking.id,
        });
        Ok(booking)
    }

    /// Rebuild a booking from storage. The event buffer starts empty.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn restore(
        id: BookingId,
        apartment_id: ApartmentId,
        user_id: UserId,
        period: DateRange,
        price: PriceBreakdown,
        status: BookingStatus,
        created_at: DateTime<Utc>,
        version: Version,
    ) -> Self {
        Self {
            id,
            apartment_id,
            user_id,
            period,
            price,
            status,
            created_at,
            confirmed_at: None,
            rejected_at: None,
            completed_at: None,
            cancelled_at: None,
            version,
            events: EventBuffer::new(),
        }
    }

    /// Confirm a reserved booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotReserved`] unless the booking is reserved.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != BookingStatus::Reserved {
            return Err(BookingError::NotReserved(self.status));
        }
        self.status = BookingStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.raise(DomainEvent::BookingConfirmed { booking_id: self.id });
        Ok(())
    }

    /// Reject a reserved booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotReserved`] unless the booking is reserved.
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != BookingStatus::Reserved {
            return Err(BookingError::NotReserved(self.status));
        }
        self.status = BookingStatus::Rejected;
        self.rejected_at = Some(now);
        self.raise(DomainEvent::BookingRejected { booking_id: self.id });
        Ok(())
    }

    /// Complete a confirmed booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotConfirmed`] unless the booking is confirmed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != BookingStatus::Confirmed {
            return Err(BookingError::NotConfirmed(self.status));
        }
        self.status = BookingStatus::Completed;
        self.completed_at = Some(now);
        self.raise(DomainEvent::BookingCompleted { booking_id: self.id });
        Ok(())
    }

    /// Cancel a confirmed booking before its first night.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotConfirmed`] unless the booking is confirmed
    /// - [`BookingError::AlreadyStarted`] if `now` is on or after the first night
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != BookingStatus::Confirmed {
            return Err(BookingError::NotConfirmed(self.status));
        }
        if now.date_naive() >= self.period.start() {
            return Err(BookingError::AlreadyStarted);
        }
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.raise(DomainEvent::BookingCancelled { booking_id: self.id });
        Ok(())
    }

    /// Events raised since the last harvest, oldest first.
    #[must_use]
    pub fn pending_events(&self) -> &[DomainEvent] {
        self.events.pending()
    }

    /// Take the buffered events, leaving the buffer empty.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.events.drain()
    }

    fn raise(&mut self, event: DomainEvent) {
        self.events.raise(event);
    }
}
