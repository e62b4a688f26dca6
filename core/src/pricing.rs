//! Booking price computation.

use crate::apartment::Apartment;
use crate::date_range::DateRange;
use crate::money::Money;
use serde::{Deserialize, Serialize};

/// Price components of a booking. All components share the apartment's currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Nightly price × number of nights
    pub price_for_period: Money,
    /// Cleaning fee
    pub cleaning_fee: Money,
    /// Sum of amenity surcharges
    pub amenities_upcharge: Money,
    /// Grand total
    pub total: Money,
}

/// Strategy for pricing a stay.
pub trait PricingPolicy: Send + Sync {
    /// Price `period` at `apartment`.
    ///
    /// Implementations may panic when the apartment's price components use
    /// different currencies.
    fn price(&self, apartment: &Apartment, period: &DateRange) -> PriceBreakdown;
}

/// Nightly price plus cleaning fee plus percentage amenity surcharges.
///
/// ```text
/// price_for_period   = nightly × nights
/// amenities_upcharge = price_for_period × Σ amenity %
/// total              = price_for_period + cleaning_fee + amenities_upcharge
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardPricing;

impl PricingPolicy for StandardPricing {
    fn price(&self, apartment: &Apartment, period: &DateRange) -> PriceBreakdown {
        let price_for_period = apartment.price.multiply(period.nights());

        let upcharge_percent: u32 = apartment
            .amenities
            .iter()
            .map(|amenity| amenity.upcharge_percent())
            .sum();
        let amenities_upcharge = price_for_period.percent(upcharge_percent);

        let total = price_for_period
            .add(apartment.cleaning_fee)
            .add(amenities_upcharge);

        PriceBreakdown {
            price_for_period,
            cleaning_fee: apartment.cleaning_fee,
            amenities_upcharge,
            total,
        }
    }
}
