//! # Lodgebook Core
//!
//! Domain model and transactional-outbox primitives for apartment bookings.
//!
//! ## Core Concepts
//!
//! - **Reservation Engine**: [`Booking::reserve`] decides whether a period can
//!   be booked, computes its price and raises `BookingReserved`
//! - **Domain Event Buffer**: each booking collects the events its operations
//!   raise ([`event::EventBuffer`])
//! - **Unit of Work**: writes aggregates and their events as outbox rows in one
//!   atomic commit ([`UnitOfWork`])
//! - **Outbox**: durable queue of events awaiting delivery ([`outbox`])
//! - **Subscribers**: out-of-band reactions to delivered events ([`subscriber`])
//!
//! ## Data Flow
//!
//! ```text
//! command ─► load ─► Booking::reserve / transition ─► UnitOfWork::commit
//!                                                        │  (aggregates + outbox rows, one tx)
//!                                                        ▼
//!            subscribers ◄── dispatcher ◄── OutboxStore::claim
//! ```
//!
//! Storage is abstracted behind [`BookingStore`] and [`OutboxStore`]; the
//! `PostgreSQL` implementation lives in `lodgebook-postgres` and an in-memory
//! one in `lodgebook-testing`.

pub mod apartment;
pub mod booking;
pub mod date_range;
pub mod event;
pub mod money;
pub mod outbox;
pub mod persistence;
pub mod pricing;
pub mod shutdown;
pub mod subscriber;
pub mod unit_of_work;
pub mod version;

// Re-export commonly used types
pub use apartment::{Amenity, Apartment, ApartmentId};
pub use booking::{Booking, BookingError, BookingId, BookingStatus, ReservationConflict, UserId};
pub use chrono::{DateTime, NaiveDate, Utc};
pub use date_range::{DateRange, DateRangeError};
pub use event::{DomainEvent, EventError, EventKind};
pub use money::{Currency, Money};
pub use outbox::{ClaimedBatch, DeliveryOutcome, NewOutboxMessage, OutboxMessage, OutboxStore};
pub use persistence::{BookingStore, BoxFuture, CommitError, PersistenceError};
pub use pricing::{PriceBreakdown, PricingPolicy, StandardPricing};
pub use shutdown::{Cancellation, ShutdownTrigger, shutdown_channel};
pub use subscriber::{DeliveryError, EventSubscriber, SubscriberRegistry};
pub use unit_of_work::{ChangeSet, UnitOfWork};
pub use version::Version;

/// Environment module - injected dependencies
///
/// Business code never reads the system time directly; it asks a [`Clock`].
/// Tests substitute a fixed or manually advanced clock.
///
/// [`Clock`]: environment::Clock
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use lodgebook_core::environment::{Clock, SystemClock};
    ///
    /// let now = SystemClock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
