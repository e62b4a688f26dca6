//! Booking periods.
//!
//! A [`DateRange`] is a half-open interval of calendar dates: the guest
//! arrives on `start` and leaves on `end`, so `end` itself is free for the next
//! booking. Two ranges that merely touch (`a.end == b.start`) do not overlap.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced when building a [`DateRange`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateRangeError {
    /// The end date is not strictly after the start date.
    #[error("Invalid date range: start {start} must be before end {end}")]
    EmptyOrInverted {
        /// Requested first night
        start: NaiveDate,
        /// Requested departure date
        end: NaiveDate,
    },
}

/// Half-open range of nights `[start, end)`.
///
/// Deserialization goes through [`DateRange::new`], so an inverted range in
/// stored data is rejected rather than constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = DateRangeError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    /// Create a range covering the nights from `start` up to, not including, `end`.
    ///
    /// # Errors
    ///
    /// Returns [`DateRangeError::EmptyOrInverted`] unless `start < end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start >= end {
            return Err(DateRangeError::EmptyOrInverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// First night of the stay.
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Departure date (not a night of the stay).
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of nights, `end - start` in days.
    #[must_use]
    pub fn nights(&self) -> u32 {
        u32::try_from((self.end - self.start).num_days()).unwrap_or(u32::MAX)
    }

    /// Half-open intersection test.
    ///
    /// `self.start < other.end && self.end > other.start`
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Whether `date` is one of the nights in the range.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
