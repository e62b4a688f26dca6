//! # Lodgebook Testing
//!
//! Testing utilities for the Lodgebook crates.
//!
//! This crate provides:
//! - [`InMemoryStore`]: `BookingStore` + `OutboxStore` with failure injection
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Recording, flaky and slow subscribers ([`subscribers`])
//! - Fixtures for apartments and periods ([`fixtures`])
//!
//! ## Example
//!
//! ```ignore
//! use lodgebook_testing::{InMemoryStore, fixtures};
//!
//! #[tokio::test]
//! async fn reserves() {
//!     let store = InMemoryStore::new();
//!     let apartment = store.insert_apartment(fixtures::apartment_usd(10));
//!     // build a ReservationService over `store` ...
//! }
//! ```

use chrono::{DateTime, Utc};
use lodgebook_core::environment::Clock;

pub mod in_memory;
pub mod subscribers;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use lodgebook_testing::mocks::FixedClock;
    /// use lodgebook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to `time`.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-05-01 09:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-05-01T09:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Domain fixtures.
pub mod fixtures {
    use lodgebook_core::{Amenity, Apartment, Currency, DateRange, Money, NaiveDate};

    /// A calendar date.
    ///
    /// # Panics
    ///
    /// Panics on an invalid date.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("fixture date should be valid")
    }

    /// Nights `[June start, June end)` of 2025.
    ///
    /// # Panics
    ///
    /// Panics unless `start < end` are both valid June days.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn june(start: u32, end: u32) -> DateRange {
        DateRange::new(date(2025, 6, start), date(2025, 6, end)).expect("fixture range should be valid")
    }

    /// Unpersisted USD apartment with no cleaning fee and no amenities.
    #[must_use]
    pub fn apartment_usd(nightly_units: u64) -> Apartment {
        Apartment::new(
            "Test Apartment",
            Money::from_units(nightly_units, Currency::Usd),
            Money::zero(Currency::Usd),
        )
    }

    /// Unpersisted EUR apartment with a cleaning fee and view amenities.
    #[must_use]
    pub fn apartment_with_view() -> Apartment {
        Apartment::new(
            "Garden Loft",
            Money::from_units(100, Currency::Eur),
            Money::from_units(25, Currency::Eur),
        )
        .with_amenities([Amenity::GardenView, Amenity::Parking, Amenity::WiFi])
    }
}

/// Install a `fmt` subscriber writing to the test harness.
///
/// Honours `RUST_LOG`; defaults to `info`. Safe to call from every test.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use in_memory::InMemoryStore;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use subscribers::{EventLog, FlakySubscriber, RecordingSubscriber, SlowSubscriber};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(test_clock().now());
        let before = clock.now();
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now() - before, chrono::Duration::days(1));
    }

    #[test]
    fn june_fixture_counts_nights() {
        assert_eq!(fixtures::june(1, 10).nights(), 9);
    }
}
