//! Price breakdowns.

use rentme_core::error::DomainError;
use rentme_core::money::Money;
use serde::{Deserialize, Serialize};

/// A named surcharge, e.g. cleaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub name: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tax {
    pub name: String,
    pub amount: Money,
}

/// A reduction. The sign of `amount` is ignored; its magnitude is subtracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub name: String,
    pub amount: Money,
}

/// A priced stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub nights: i64,
    pub nightly: Money,
    pub fees: Vec<Fee>,
    pub taxes: Vec<Tax>,
    pub discounts: Vec<Discount>,
    /// Last computed total; see [`PriceBreakdown::recalculate_total`].
    pub total: Money,
}

impl PriceBreakdown {
    /// A breakdown with no components; the total is computed immediately.
    ///
    /// # Errors
    ///
    /// See [`PriceBreakdown::recalculate_total`].
    pub fn new(nights: i64, nightly: Money) -> Result<Self, DomainError> {
        let mut breakdown = Self {
            nights,
            total: Money {
                amount: 0,
                currency: nightly.currency.clone(),
            },
            nightly,
            fees: Vec::new(),
            taxes: Vec::new(),
            discounts: Vec::new(),
        };
        breakdown.recalculate_total()?;
        Ok(breakdown)
    }

    /// Adds a fee and recomputes the total.
    ///
    /// # Errors
    ///
    /// See [`PriceBreakdown::recalculate_total`].
    pub fn with_fee(mut self, name: &str, amount: Money) -> Result<Self, DomainError> {
        self.fees.push(Fee {
            name: name.to_owned(),
            amount,
        });
        self.recalculate_total()?;
        Ok(self)
    }

    /// Adds a tax and recomputes the total.
    ///
    /// # Errors
    ///
    /// See [`PriceBreakdown::recalculate_total`].
    pub fn with_tax(mut self, name: &str, amount: Money) -> Result<Self, DomainError> {
        self.taxes.push(Tax {
            name: name.to_owned(),
            amount,
        });
        self.recalculate_total()?;
        Ok(self)
    }

    /// Adds a discount and recomputes the total.
    ///
    /// # Errors
    ///
    /// See [`PriceBreakdown::recalculate_total`].
    pub fn with_discount(mut self, name: &str, amount: Money) -> Result<Self, DomainError> {
        self.discounts.push(Discount {
            name: name.to_owned(),
            amount,
        });
        self.recalculate_total()?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Fails when the nightly currency is unset or `nights` is not positive.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.nightly.currency.is_empty() {
            return Err(DomainError::InvalidCurrency(String::new()));
        }
        if self.nights <= 0 {
            return Err(DomainError::Validation("nights must be positive".into()));
        }
        Ok(())
    }

    /// `nightly * nights + fees + taxes - |discounts|`, floored at zero.
    ///
    /// # Errors
    ///
    /// Fails on invalid nights or currency, a negative fee or tax, a
    /// component in another currency, or overflow.
    pub fn computed_total(&self) -> Result<Money, DomainError> {
        self.validate()?;
        let mut total = self.nightly.multiply(self.nights)?;
        for fee in &self.fees {
            if fee.amount.amount < 0 {
                return Err(DomainError::Validation(format!(
                    "fee {} cannot be negative",
                    fee.name
                )));
            }
            total = total.checked_add(&fee.amount)?;
        }
        for tax in &self.taxes {
            if tax.amount.amount < 0 {
                return Err(DomainError::Validation(format!(
                    "tax {} cannot be negative",
                    tax.name
                )));
            }
            total = total.checked_add(&tax.amount)?;
        }
        for discount in &self.discounts {
            total = total.checked_sub(&discount.amount.abs())?;
        }
        Ok(total.floor_zero())
    }

    /// Stores [`PriceBreakdown::computed_total`] in `total`. On error the
    /// breakdown is left unchanged.
    ///
    /// # Errors
    ///
    /// See [`PriceBreakdown::computed_total`].
    pub fn recalculate_total(&mut self) -> Result<(), DomainError> {
        self.total = self.computed_total()?;
        Ok(())
    }
}
