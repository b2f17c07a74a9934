//! The `Stars` currency type.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// An amount of Stars, always held at a fixed scale of 2 decimal places.
///
/// Amounts are signed: ledger debits are stored as negative values so a
/// user's balance is the plain sum of their transactions. Constructors
/// reject inputs with more than 2 significant decimal places instead of
/// silently rounding them.
///
/// Serialized as the decimal string, e.g. `"50.00"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Stars(Decimal);

impl Stars {
    /// Number of decimal places every amount carries.
    pub const SCALE: u32 = 2;

    /// Zero Stars.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Builds an amount from a decimal, rejecting sub-cent precision.
    pub fn new(value: Decimal) -> Result<Self, ProtocolError> {
        if value.normalize().scale() > Self::SCALE {
            return Err(ProtocolError::InvalidAmount(format!(
                "{value} has more than {} decimal places",
                Self::SCALE
            )));
        }
        Ok(Self::rescaled(value))
    }

    /// Builds an amount from a whole number of hundredths.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, Self::SCALE))
    }

    /// Builds an amount from a whole number of Stars.
    pub fn whole(stars: i64) -> Self {
        Self::rescaled(Decimal::from(stars))
    }

    /// The underlying decimal value.
    pub fn amount(self) -> Decimal {
        self.0
    }

    /// `true` if the amount is strictly greater than zero.
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// `true` if the amount is strictly less than zero.
    pub fn is_negative(self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// `true` if the amount is exactly zero.
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Absolute value.
    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Multiplies by a participant count (`entry_fee × participants`).
    pub fn times(self, count: usize) -> Self {
        Self::rescaled(self.0 * Decimal::from(count))
    }

    /// `self + rhs`, or `None` outside the representable range.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self::rescaled)
    }

    /// `self × count`, or `None` outside the representable range.
    pub fn checked_times(self, count: usize) -> Option<Self> {
        self.0.checked_mul(Decimal::from(count)).map(Self::rescaled)
    }

    /// Takes a fraction of this amount, rounded toward zero to 2 places.
    ///
    /// Rounding toward zero means the share never exceeds the exact
    /// product; callers that split a pot give the remainder to the other
    /// side.
    pub fn share(self, fraction: Decimal) -> Self {
        let exact = self.0 * fraction;
        Self::rescaled(
            exact.round_dp_with_strategy(Self::SCALE, RoundingStrategy::ToZero),
        )
    }

    fn rescaled(mut value: Decimal) -> Self {
        value.rescale(Self::SCALE);
        Self(value)
    }
}

impl TryFrom<Decimal> for Stars {
    type Error = ProtocolError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Stars> for Decimal {
    fn from(value: Stars) -> Self {
        value.0
    }
}

impl FromStr for Stars {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| {
            ProtocolError::InvalidAmount(format!("{s:?}: {e}"))
        })?;
        Self::new(value)
    }
}

impl fmt::Display for Stars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Stars {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::rescaled(self.0 + rhs.0)
    }
}

impl AddAssign for Stars {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Stars {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::rescaled(self.0 - rhs.0)
    }
}

impl Neg for Stars {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Stars {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Stars> for Stars {
    fn sum<I: Iterator<Item = &'a Stars>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
