//! Row version token for optimistic concurrency control.
//!
//! Every persisted aggregate row (apartments, bookings) carries a [`Version`].
//! Writes name the version they were loaded at; the store rejects the write when
//! the stored version has moved on, which surfaces as
//! [`CommitError::Concurrency`](crate::persistence::CommitError::Concurrency).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version number of a persisted aggregate row.
///
/// - [`Version::INITIAL`] (0) marks an aggregate that has never been written.
///   The store inserts it and assigns version 1.
/// - Any other value is the version the aggregate was loaded at. The store
///   only updates the row when the stored version still equals it, and writes
///   `version.next()`.
///
/// # Examples
///
/// ```
/// use lodgebook_core::version::Version;
///
/// let v0 = Version::INITIAL;
/// assert!(v0.is_initial());
/// assert_eq!(v0.next(), Version::new(1));
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of an aggregate that has not been persisted yet.
    pub const INITIAL: Self = Self(0);

    /// Create a `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the version the row will carry after a successful write.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check whether the aggregate has never been persisted.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
