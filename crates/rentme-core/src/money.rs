//! Integer minor-unit money.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// An amount in minor units (cents) of a 3-letter currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Signed amount in minor units.
    pub amount: i64,
    /// Upper-case ISO-style currency code.
    pub currency: String,
}

impl Money {
    /// Creates an amount, normalizing the currency to upper case.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidCurrency`] unless `currency` is exactly
    /// three ASCII letters.
    pub fn new(amount: i64, currency: &str) -> Result<Self, DomainError> {
        let trimmed = currency.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidCurrency(currency.to_owned()));
        }
        Ok(Self {
            amount,
            currency: trimmed.to_ascii_uppercase(),
        })
    }

    /// Zero in the given currency.
    ///
    /// # Errors
    ///
    /// See [`Money::new`].
    pub fn zero(currency: &str) -> Result<Self, DomainError> {
        Self::new(0, currency)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Adds two amounts of the same currency.
    ///
    /// # Errors
    ///
    /// Fails on a currency mismatch or on overflow.
    pub fn checked_add(&self, other: &Money) -> Result<Money, DomainError> {
        self.same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::Validation("money overflow".into()))?;
        Ok(Money {
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Subtracts `other` from `self`.
    ///
    /// # Errors
    ///
    /// Fails on a currency mismatch or on overflow.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, DomainError> {
        self.same_currency(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or_else(|| DomainError::Validation("money overflow".into()))?;
        Ok(Money {
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Multiplies by a non-negative count (e.g. nights).
    ///
    /// # Errors
    ///
    /// Fails on overflow.
    pub fn multiply(&self, factor: i64) -> Result<Money, DomainError> {
        let amount = self
            .amount
            .checked_mul(factor)
            .ok_or_else(|| DomainError::Validation("money overflow".into()))?;
        Ok(Money {
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(&self) -> Money {
        Money {
            amount: self.amount.saturating_abs(),
            currency: self.currency.clone(),
        }
    }

    /// Clamps a negative amount to zero.
    #[must_use]
    pub fn floor_zero(&self) -> Money {
        Money {
            amount: self.amount.max(0),
            currency: self.currency.clone(),
        }
    }

    fn same_currency(&self, other: &Money) -> Result<(), DomainError> {
        if self.currency.is_empty() || other.currency.is_empty() || self.currency != other.currency
        {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_uppercases_currency() {
        let m = Money::new(100, "usd").unwrap();
        assert_eq!(m.currency, "USD");
    }

    #[test]
    fn test_new_rejects_malformed_currency() {
        assert_eq!(
            Money::new(1, "US"),
            Err(DomainError::InvalidCurrency("US".into()))
        );
        assert!(Money::new(1, "U5D").is_err());
        assert!(Money::new(1, "").is_err());
    }

    #[test]
    fn test_add_with_mismatched_currency_fails() {
        // Arrange
        let usd = Money::new(100, "USD").unwrap();
        let eur = Money::new(100, "EUR").unwrap();

        // Act
        let result = usd.checked_add(&eur);

        // Assert
        assert_eq!(
            result,
            Err(DomainError::CurrencyMismatch {
                left: "USD".into(),
                right: "EUR".into(),
            })
        );
    }

    #[test]
    fn test_multiply_overflow_is_an_error() {
        let m = Money::new(i64::MAX, "USD").unwrap();
        assert!(m.multiply(2).is_err());
    }

    #[test]
    fn test_floor_zero_clamps_negative_amounts() {
        let m = Money::new(-50, "USD").unwrap();
        assert_eq!(m.floor_zero().amount, 0);
        assert_eq!(m.abs().amount, 50);
    }

    proptest! {
        #[test]
        fn prop_add_then_sub_is_identity(a in -1_000_000_000i64..1_000_000_000, b in -1_000_000_000i64..1_000_000_000) {
            let x = Money::new(a, "USD").unwrap();
            let y = Money::new(b, "USD").unwrap();
            let back = x.checked_add(&y).unwrap().checked_sub(&y).unwrap();
            prop_assert_eq!(back, x);
        }
    }
}
