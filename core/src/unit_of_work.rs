//! Unit of Work: one atomic commit of aggregates plus their outbox rows.
//!
//! Aggregates touched by a command are registered explicitly with
//! [`UnitOfWork::track_apartment`] / [`UnitOfWork::track_booking`]. On
//! [`UnitOfWork::commit`] every tracked booking's event buffer is drained
//! exactly once into [`NewOutboxMessage`]s, the aggregates are snapshotted
//! with the versions they were loaded at, and the resulting [`ChangeSet`] is
//! handed to the [`BookingStore`] as a single all-or-nothing write.
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new(clock.now());
//! uow.track_apartment(&mut apartment);
//! uow.track_booking(&mut booking);
//! uow.commit(store.as_ref()).await?;
//! ```
//!
//! # Failure
//!
//! Buffers are drained before the store is called. When the commit fails the
//! tracked aggregates no longer describe anything durable and must be
//! reloaded before retrying.

use crate::apartment::Apartment;
use crate::booking::Booking;
use crate::event::EventError;
use crate::outbox::NewOutboxMessage;
use crate::persistence::{BookingStore, CommitError, PersistenceError};
use chrono::{DateTime, Utc};

/// Everything one commit writes.
///
/// Each aggregate carries the version it was loaded at in its own `version`
/// field; the store checks against it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Apartments to insert or update
    pub apartments: Vec<Apartment>,
    /// Bookings to insert or update
    pub bookings: Vec<Booking>,
    /// Outbox rows, in raise order
    pub outbox: Vec<NewOutboxMessage>,
}

impl ChangeSet {
    /// Whether the change set writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apartments.is_empty() && self.bookings.is_empty() && self.outbox.is_empty()
    }

    /// Number of rows the change set writes.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.apartments.len() + self.bookings.len() + self.outbox.len()
    }
}

/// Aggregates touched by one command.
#[derive(Debug)]
pub struct UnitOfWork<'a> {
    apartments: Vec<&'a mut Apartment>,
    bookings: Vec<&'a mut Booking>,
    occurred_at: DateTime<Utc>,
}

impl<'a> UnitOfWork<'a> {
    /// Start a unit of work. `occurred_at` stamps every outbox row it writes.
    #[must_use]
    pub const fn new(occurred_at: DateTime<Utc>) -> Self {
        Self {
            apartments: Vec::new(),
            bookings: Vec::new(),
            occurred_at,
        }
    }

    /// Register an apartment to be written.
    pub fn track_apartment(&mut self, apartment: &'a mut Apartment) -> &mut Self {
        self.apartments.push(apartment);
        self
    }

    /// Register a booking to be written together with its buffered events.
    pub fn track_booking(&mut self, booking: &'a mut Booking) -> &mut Self {
        self.bookings.push(booking);
        self
    }

    /// Drain every tracked booking's events and snapshot the aggregates.
    ///
    /// Outbox rows follow tracking order, then raise order within a booking.
    /// A second harvest yields no outbox rows.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if an event cannot be
    /// serialized. Buffers drained before the failure stay drained.
    pub fn harvest(&mut self) -> Result<ChangeSet, EventError> {
        let mut outbox = Vec::new();
        for booking in &mut self.bookings {
            for event in booking.drain_events() {
                outbox.push(NewOutboxMessage::from_event(&event, self.occurred_at)?);
            }
        }

        Ok(ChangeSet {
            apartments: self.apartments.iter().map(|a| (**a).clone()).collect(),
            bookings: self.bookings.iter().map(|b| (**b).clone()).collect(),
            outbox,
        })
    }

    /// Harvest and write everything in one store commit.
    ///
    /// On success every tracked aggregate's version advances to the one the
    /// store wrote. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// - [`CommitError::Concurrency`] if an aggregate changed since it was loaded
    /// - [`CommitError::Persistence`] if serialization or the store fails
    pub async fn commit<S>(mut self, store: &S) -> Result<usize, CommitError>
    where
        S: BookingStore + ?Sized,
    {
        let changes = self
            .harvest()
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        let written = store.commit(changes).await?;

        for apartment in &mut self.apartments {
            apartment.version = apartment.version.next();
        }
        for booking in &mut self.bookings {
            booking.version = booking.version.next();
        }
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::booking::UserId;
    use crate::date_range::DateRange;
    use crate::event::DomainEvent;
    use crate::money::{Currency, Money};
    use crate::pricing::StandardPricing;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()
    }

    fn reserved() -> (Apartment, Booking) {
        let mut apartment = Apartment::new(
            "A",
            Money::from_units(10, Currency::Usd),
            Money::zero(Currency::Usd),
        );
        let period = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        )
        .unwrap();
        let booking = Booking::reserve(
            &mut apartment,
            UserId::new(),
            period,
            now(),
            &StandardPricing,
            &[],
        )
        .unwrap();
        (apartment, booking)
    }

    #[test]
    fn harvest_drains_events_exactly_once() {
        let (mut apartment, mut booking) = reserved();
        booking.confirm(now()).unwrap();
        let booking_id = booking.id;

        let mut uow = UnitOfWork::new(now());
        uow.track_apartment(&mut apartment).track_booking(&mut booking);

        let changes = uow.harvest().unwrap();
        assert_eq!(changes.apartments.len(), 1);
        assert_eq!(changes.bookings.len(), 1);
        let types: Vec<_> = changes.outbox.iter().map(|m| m.event_type.as_str()).collect();
        assert_eq!(types, vec!["BookingReserved.v1", "BookingConfirmed.v1"]);
        assert!(changes.outbox.iter().all(|m| m.occurred_at == now()));
        assert_eq!(
            changes.outbox[0].payload,
            DomainEvent::BookingReserved { booking_id }.to_payload().unwrap()
        );

        let again = uow.harvest().unwrap();
        assert!(again.outbox.is_empty());
        assert_eq!(again.row_count(), 2);
        drop(uow);
        assert!(booking.pending_events().is_empty());
    }

    #[test]
    fn outbox_follows_tracking_order() {
        let (mut first_apartment, mut first) = reserved();
        let (_, mut second) = reserved();
        second.confirm(now()).unwrap();
        let (first_id, second_id) = (first.id, second.id);

        let mut uow = UnitOfWork::new(now());
        uow.track_apartment(&mut first_apartment)
            .track_booking(&mut second)
            .track_booking(&mut first);
        let changes = uow.harvest().unwrap();

        let owners: Vec<_> = changes
            .outbox
            .iter()
            .map(|m| m.payload["booking_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            owners,
            vec![second_id.to_string(), second_id.to_string(), first_id.to_string()]
        );
    }

    #[test]
    fn empty_unit_of_work_writes_nothing() {
        let mut uow = UnitOfWork::new(now());
        let changes = uow.harvest().unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.row_count(), 0);
    }
}
