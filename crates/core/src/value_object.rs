//! Value objects: equality by value, not identity.
//!
//! The ledger works in two fixed-point units:
//!
//! - [`Carats`]: physical quantity, three decimal places.
//! - [`Money`]: currency amounts and unit prices, two decimal places.
//!
//! Both round on construction (midpoint away from zero), so anything that is
//! stored is already at its persisted precision and reading it back never
//! re-rounds.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Decimal places kept on physical quantities.
pub const QUANTITY_SCALE: u32 = 3;

/// Decimal places kept on currency values.
pub const CURRENCY_SCALE: u32 = 2;

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Sum full-precision values, failing on the first error or on overflow.
pub fn sum_values<I>(values: I) -> DomainResult<Decimal>
where
    I: IntoIterator<Item = DomainResult<Decimal>>,
{
    values.into_iter().try_fold(Decimal::ZERO, |acc, value| {
        acc.checked_add(value?)
            .ok_or_else(|| DomainError::validation("total value is out of range"))
    })
}

fn round(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// A quantity of material in carats (3dp). May be negative only as a signed
/// movement delta.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Carats(Decimal);

impl Carats {
    pub const ZERO: Carats = Carats(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(round(value, QUANTITY_SCALE))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Value of this quantity at `unit_price`, at full precision.
    ///
    /// Fails instead of overflowing when the product does not fit in a
    /// `Decimal`.
    pub fn times(&self, unit_price: Money) -> DomainResult<Decimal> {
        self.0.checked_mul(unit_price.value()).ok_or_else(|| {
            DomainError::validation(format!(
                "value of {self} ct at {unit_price} is out of range"
            ))
        })
    }
}

impl From<Decimal> for Carats {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Carats> for Decimal {
    fn from(value: Carats) -> Self {
        value.0
    }
}

impl fmt::Display for Carats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

impl Add for Carats {
    type Output = Carats;

    fn add(self, rhs: Self) -> Self::Output {
        Carats::new(self.0 + rhs.0)
    }
}

impl Sub for Carats {
    type Output = Carats;

    fn sub(self, rhs: Self) -> Self::Output {
        Carats::new(self.0 - rhs.0)
    }
}

impl AddAssign for Carats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Carats {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Carats {
    type Output = Carats;

    fn neg(self) -> Self::Output {
        Carats(-self.0)
    }
}

impl Sum for Carats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Carats::ZERO, |acc, c| acc + c)
    }
}

impl<'a> Sum<&'a Carats> for Carats {
    fn sum<I: Iterator<Item = &'a Carats>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl ValueObject for Carats {}

/// A currency amount or unit price (2dp).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(round(value, CURRENCY_SCALE))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money::new(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl ValueObject for Money {}
