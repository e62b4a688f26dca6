//! Apartments that can be booked.

use crate::money::{Currency, Money};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an apartment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApartmentId(Uuid);

impl ApartmentId {
    /// Creates a new random `ApartmentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `ApartmentId` from a `Uuid`
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

impl Default for ApartmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when an amenity name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown amenity: {0}")]
pub struct UnknownAmenity(pub String);

/// Amenities an apartment may offer. Some carry a percentage upcharge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Amenity {
    /// Wireless internet
    WiFi,
    /// Air conditioning
    AirConditioning,
    /// Private parking
    Parking,
    /// Pets allowed
    PetFriendly,
    /// Swimming pool
    SwimmingPool,
    /// Gym access
    Gym,
    /// Spa access
    Spa,
    /// Terrace
    Terrace,
    /// Mountain view
    MountainView,
    /// Garden view
    GardenView,
}

impl Amenity {
    /// Percentage of the period price added for this amenity.
    #[must_use]
    pub const fn upcharge_percent(self) -> u32 {
        match self {
            Self::GardenView | Self::MountainView => 5,
            Self::AirConditioning | Self::Parking => 1,
            Self::WiFi
            | Self::PetFriendly
            | Self::SwimmingPool
            | Self::Gym
            | Self::Spa
            | Self::Terrace => 0,
        }
    }

    /// Storage name of the amenity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WiFi => "wifi",
            Self::AirConditioning => "air_conditioning",
            Self::Parking => "parking",
            Self::PetFriendly => "pet_friendly",
            Self::SwimmingPool => "swimming_pool",
            Self::Gym => "gym",
            Self::Spa => "spa",
            Self::Terrace => "terrace",
            Self::MountainView => "mountain_view",
            Self::GardenView => "garden_view",
        }
    }

    /// Parse a storage name.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownAmenity`] for names that are not in the closed set.
    pub fn parse(s: &str) -> Result<Self, UnknownAmenity> {
        match s {
            "wifi" => Ok(Self::WiFi),
            "air_conditioning" => Ok(Self::AirConditioning),
            "parking" => Ok(Self::Parking),
            "pet_friendly" => Ok(Self::PetFriendly),
            "swimming_pool" => Ok(Self::SwimmingPool),
            "gym" => Ok(Self::Gym),
            "spa" => Ok(Self::Spa),
            "terrace" => Ok(Self::Terrace),
            "mountain_view" => Ok(Self::MountainView),
            "garden_view" => Ok(Self::GardenView),
            other => Err(UnknownAmenity(other.to_string())),
        }
    }
}

/// A bookable apartment.
///
/// The apartment row is versioned. Every reservation touches it
/// ([`Apartment::mark_booked`]) so concurrent reservations for the same
/// apartment contend on a single row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Apartment {
    /// Apartment identifier
    pub id: ApartmentId,
    /// Display name
    pub name: String,
    /// Price per night; its currency is the apartment's currency
    pub price: Money,
    /// One-off cleaning fee per booking
    pub cleaning_fee: Money,
    /// Offered amenities
    pub amenities: Vec<Amenity>,
    /// When the apartment was last reserved
    pub last_booked_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token
    pub version: Version,
}

impl Apartment {
    /// Create an apartment that has not been persisted yet.
    #[must_use]
    pub fn new(name: impl Into<String>, price: Money, cleaning_fee: Money) -> Self {
        Self {
            id: ApartmentId::new(),
            name: name.into(),
            price,
            cleaning_fee,
            amenities: Vec::new(),
            last_booked_at: None,
            version: Version::INITIAL,
        }
    }

    /// Set the amenities offered.
    #[must_use]
    pub fn with_amenities(mut self, amenities: impl IntoIterator<Item = Amenity>) -> Self {
        self.amenities = amenities.into_iter().collect();
        self
    }

    /// Currency every price component of this apartment must use.
    #[must_use]
    pub const fn currency(&self) -> Currency {
        self.price.currency()
    }

    /// Record that the apartment was just reserved.
    pub fn mark_booked(&mut self, now: DateTime<Utc>) {
        self.last_booked_at = Some(now);
    }
}
