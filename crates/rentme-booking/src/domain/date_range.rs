//! Stay date ranges.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rentme_core::error::DomainError;
use serde::{Deserialize, Serialize};

/// A half-open stay `[check_in, check_out)` in whole nights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] unless check-out is after check-in.
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, DomainError> {
        if check_out <= check_in {
            return Err(DomainError::Validation(
                "check-out must be after check-in".into(),
            ));
        }
        Ok(Self {
            check_in,
            check_out,
        })
    }

    #[must_use]
    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    #[must_use]
    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    #[must_use]
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Start of the check-in day, UTC.
    #[must_use]
    pub fn check_in_at(&self) -> DateTime<Utc> {
        self.check_in.and_time(NaiveTime::MIN).and_utc()
    }

    /// Start of the check-out day, UTC.
    #[must_use]
    pub fn check_out_at(&self) -> DateTime<Utc> {
        self.check_out.and_time(NaiveTime::MIN).and_utc()
    }

    /// Whether two stays share at least one night.
    #[must_use]
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// Rejects a stay whose check-in day is before `today`. Same-day
    /// check-in is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a past check-in.
    pub fn ensure_not_past(&self, today: NaiveDate) -> Result<(), DomainError> {
        if self.check_in < today {
            return Err(DomainError::Validation(
                "check-in date is in the past".into(),
            ));
        }
        Ok(())
    }
}
