//! Money value object.
//!
//! Amounts are kept in minor units (cents) to avoid floating point errors.
//! Every amount carries its currency; combining two amounts of different
//! currencies is a programming error and panics rather than returning a
//! recoverable error.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error returned when a currency code is not supported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported currency code: {0}")]
pub struct UnknownCurrency(pub String);

/// Supported currencies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// US dollar
    Usd,
    /// Euro
    Eur,
}

impl Currency {
    /// ISO 4217 code of the currency.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }

    /// Parse an ISO 4217 code.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCurrency`] if the code is not supported.
    pub fn parse(code: &str) -> Result<Self, UnknownCurrency> {
        match code {
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            other => Err(UnknownCurrency(other.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An amount of money in minor units of a single currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: u64,
    currency: Currency,
}

impl Money {
    /// Creates a `Money` value from minor units (cents).
    #[must_use]
    pub const fn from_cents(amount: u64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Creates a `Money` value from whole units (dollars, euros).
    ///
    /// # Panics
    ///
    /// Panics if the conversion would overflow.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn from_units(units: u64, currency: Currency) -> Self {
        match units.checked_mul(100) {
            Some(amount) => Self { amount, currency },
            None => panic!("Money::from_units overflow"),
        }
    }

    /// Zero in the given currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self { amount: 0, currency }
    }

    /// Amount in minor units.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.amount
    }

    /// Currency of this amount.
    #[must_use]
    pub const fn currency(&self) -> Currency {
        self.currency
    }

    /// Checks if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Adds two amounts, returning `None` on overflow or currency mismatch.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        if self.currency != other.currency {
            return None;
        }
        self.amount
            .checked_add(other.amount)
            .map(|amount| Self::from_cents(amount, self.currency))
    }

    /// Adds two amounts of the same currency.
    ///
    /// # Panics
    ///
    /// Panics if the currencies differ or the addition overflows. Mixing
    /// currencies means an apartment was configured inconsistently, which no
    /// caller can recover from.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn add(self, other: Self) -> Self {
        assert_same_currency(self, other);
        match self.checked_add(other) {
            Some(result) => result,
            None => panic!("Money::add overflow"),
        }
    }

    /// Multiplies the amount by a quantity with overflow checking.
    #[must_use]
    pub fn checked_multiply(self, quantity: u32) -> Option<Self> {
        self.amount
            .checked_mul(u64::from(quantity))
            .map(|amount| Self::from_cents(amount, self.currency))
    }

    /// Multiplies the amount by a quantity.
    ///
    /// # Panics
    ///
    /// Panics if the multiplication would overflow.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn multiply(self, quantity: u32) -> Self {
        match self.checked_multiply(quantity) {
            Some(result) => result,
            None => panic!("Money::multiply overflow"),
        }
    }

    /// Takes a whole-number percentage of the amount, rounding down.
    ///
    /// # Panics
    ///
    /// Panics if the intermediate product overflows.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn percent(self, percent: u32) -> Self {
        match self.amount.checked_mul(u64::from(percent)) {
            Some(product) => Self::from_cents(product / 100, self.currency),
            None => panic!("Money::percent overflow"),
        }
    }
}

#[allow(clippy::panic)]
fn assert_same_currency(left: Money, right: Money) {
    if left.currency != right.currency {
        panic!(
            "currency mismatch: cannot combine {} with {}",
            left.currency, right.currency
        );
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount / 100,
            self.amount % 100,
            self.currency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_units_and_display() {
        let price = Money::from_units(10, Currency::Usd);
        assert_eq!(price.cents(), 1_000);
        assert_eq!(price.to_string(), "10.00 USD");
    }

    #[test]
    fn add_and_multiply() {
        let nightly = Money::from_units(10, Currency::Usd);
        let fee = Money::from_cents(250, Currency::Usd);

        assert_eq!(nightly.multiply(9), Money::from_units(90, Currency::Usd));
        assert_eq!(nightly.add(fee).cents(), 1_250);
    }

    #[test]
    fn percent_rounds_down() {
        let base = Money::from_cents(999, Currency::Eur);
        assert_eq!(base.percent(5).cents(), 49);
        assert!(base.percent(0).is_zero());
    }

    #[test]
    fn checked_add_rejects_mixed_currencies() {
        let usd = Money::from_units(1, Currency::Usd);
        let eur = Money::from_units(1, Currency::Eur);
        assert_eq!(usd.checked_add(eur), None);
    }

    #[test]
    #[should_panic(expected = "currency mismatch")]
    fn add_panics_on_mixed_currencies() {
        let usd = Money::from_units(1, Currency::Usd);
        let eur = Money::from_units(1, Currency::Eur);
        let _ = usd.add(eur);
    }

    #[test]
    fn currency_code_roundtrip() {
        for currency in [Currency::Usd, Currency::Eur] {
            assert_eq!(Currency::parse(currency.code()), Ok(currency));
        }
        assert!(Currency::parse("GBP").is_err());
    }
}
