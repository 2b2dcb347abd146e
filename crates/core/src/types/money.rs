//! Monetary amounts using decimal arithmetic.
//!
//! The storefront trades in a single currency, so `Money` carries only an
//! amount. Values are rounded to cents on construction and are never negative.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing [`Money`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// The amount is below zero.
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
}

/// A non-negative amount, stored with two decimal places.
///
/// ```
/// use bazaar_core::Money;
/// use rust_decimal::Decimal;
///
/// let price = Money::new(Decimal::new(1999, 2)).unwrap();
/// assert_eq!(price.times(3).to_string(), "59.97");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create an amount, rounding half-even to cents.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::Negative` if `amount < 0`.
    pub fn new(amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::Negative(amount));
        }
        Ok(Self(
            amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
        ))
    }

    /// Create an amount from a whole number of cents.
    #[must_use]
    pub fn from_cents(cents: u32) -> Self {
        Self(Decimal::new(i64::from(cents), 2))
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Line total for `quantity` units at this price. Non-positive
    /// quantities yield zero.
    #[must_use]
    pub fn times(&self, quantity: i32) -> Self {
        if quantity <= 0 {
            return Self::ZERO;
        }
        Self(self.0 * Decimal::from(quantity))
    }

    /// Returns `true` when the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Money {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Money {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let amount = <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::new(amount)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Money {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_negative() {
        assert!(matches!(
            Money::new(Decimal::new(-1, 2)),
            Err(MoneyError::Negative(_))
        ));
    }

    #[test]
    fn test_negative_zero_is_zero() {
        let zero = Money::new(-Decimal::ZERO).unwrap();
        assert!(zero.is_zero());
    }

    #[test]
    fn test_rounds_to_cents() {
        let m = Money::new(Decimal::new(10_005, 3)).unwrap();
        assert_eq!(m.to_string(), "10.00");
        let m = Money::new(Decimal::new(10_015, 3)).unwrap();
        assert_eq!(m.to_string(), "10.02");
    }

    #[test]
    fn test_times_and_sum() {
        let lines = [Money::from_cents(250).times(2), Money::from_cents(1999).times(1)];
        let total: Money = lines.into_iter().sum();
        assert_eq!(total, Money::from_cents(2499));
    }

    #[test]
    fn test_times_non_positive_quantity() {
        assert_eq!(Money::from_cents(500).times(0), Money::ZERO);
        assert_eq!(Money::from_cents(500).times(-3), Money::ZERO);
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&Money::from_cents(1234)).unwrap();
        assert_eq!(json, "\"12.34\"");
    }
}
