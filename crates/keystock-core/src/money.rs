//! # Money Module
//!
//! Provides the `Money` type and the `Pricing` triple attached to products
//! and units.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units (cents)                              │
//! │    Every price, min price, max price and purchase cost is an i64       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pricing Inheritance
//! ```text
//! Product pricing:  { price: 499.00, min: 450.00, max: 520.00 }
//! Unit overrides:   { price: 475.00, min: None,   max: None   }
//!                         │
//!                         ▼  Pricing::or(product pricing)
//! Effective:        { price: 475.00, min: 450.00, max: 520.00 }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use keystock_core::money::Money;
    ///
    /// let price = Money::from_cents(49_900);
    /// assert_eq!(price.cents(), 49_900);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

/// Debug-oriented rendering. Currency formatting for display lives in the UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.dollars().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

// =============================================================================
// Pricing
// =============================================================================

/// Price, minimum price and maximum price, each optional.
///
/// ## Invariant
/// When both `min_price` and `max_price` are set, `min_price < max_price`.
/// Use [`Pricing::validate`] before persisting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Pricing {
    pub price: Option<Money>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
}

impl Pricing {
    /// Builds pricing from nullable cent columns.
    pub fn from_cents(price: Option<i64>, min_price: Option<i64>, max_price: Option<i64>) -> Self {
        Pricing {
            price: price.map(Money::from_cents),
            min_price: min_price.map(Money::from_cents),
            max_price: max_price.map(Money::from_cents),
        }
    }

    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.min_price.is_none() && self.max_price.is_none()
    }

    /// Fills every unset field from `fallback`.
    ///
    /// ## Example
    /// ```rust
    /// use keystock_core::money::{Money, Pricing};
    ///
    /// let product = Pricing::from_cents(Some(49_900), Some(45_000), Some(52_000));
    /// let unit = Pricing::from_cents(Some(47_500), None, None);
    ///
    /// let effective = unit.or(&product);
    /// assert_eq!(effective.price, Some(Money::from_cents(47_500)));
    /// assert_eq!(effective.min_price, Some(Money::from_cents(45_000)));
    /// ```
    pub fn or(&self, fallback: &Pricing) -> Pricing {
        Pricing {
            price: self.price.or(fallback.price),
            min_price: self.min_price.or(fallback.min_price),
            max_price: self.max_price.or(fallback.max_price),
        }
    }

    /// Checks non-negative amounts and the min < max rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("price", self.price),
            ("min_price", self.min_price),
            ("max_price", self.max_price),
        ];
        for (field, value) in fields {
            if let Some(money) = value {
                if money.is_negative() {
                    return Err(ValidationError::OutOfRange {
                        field: field.to_string(),
                        min: 0,
                        max: i64::MAX,
                    });
                }
            }
        }

        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min >= max {
                return Err(ValidationError::PriceRange {
                    min: min.cents(),
                    max: max.cents(),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
