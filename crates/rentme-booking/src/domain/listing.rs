//! Host listings, as far as booking needs them.

use chrono::TimeDelta;
use rentme_core::error::DomainError;
use rentme_core::money::Money;
use serde::{Deserialize, Serialize};

use super::cancellation::CancellationPolicySnapshot;
use super::date_range::DateRange;
use super::ids::{HostId, ListingId};

/// A listing's live cancellation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub id: String,
    /// Cancellation is free until this many hours before check-in.
    pub free_cancellation_hours: i64,
    pub pre_check_in_penalty_percent: i32,
    pub post_check_in_penalty_percent: i32,
}

impl CancellationPolicy {
    /// Freezes the policy for a concrete stay.
    #[must_use]
    pub fn snapshot_for(&self, range: &DateRange) -> CancellationPolicySnapshot {
        let free_until = (self.free_cancellation_hours > 0)
            .then(|| range.check_in_at() - TimeDelta::hours(self.free_cancellation_hours));
        CancellationPolicySnapshot::new(
            &self.id,
            free_until,
            self.pre_check_in_penalty_percent,
            self.post_check_in_penalty_percent,
        )
    }
}

/// Running tally of a listing's review ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RatingSummary {
    pub review_count: u32,
    pub rating_total: u32,
}

impl RatingSummary {
    /// Mean rating, or `None` before the first review.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        (self.review_count > 0)
            .then(|| f64::from(self.rating_total) / f64::from(self.review_count))
    }
}

/// A bookable property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub host_id: HostId,
    pub title: String,
    pub nightly_rate: Money,
    pub cleaning_fee: Option<Money>,
    pub max_guests: u32,
    pub cancellation_policy: Option<CancellationPolicy>,
    #[serde(default)]
    pub rating: RatingSummary,
    /// Optimistic concurrency version; bumped by every save.
    pub version: i64,
}

impl Listing {
    /// # Errors
    ///
    /// Returns [`DomainError::Forbidden`] if `host_id` does not own the
    /// listing.
    pub fn ensure_owned_by(&self, host_id: &HostId) -> Result<(), DomainError> {
        if &self.host_id != host_id {
            return Err(DomainError::Forbidden(format!(
                "listing {} is not owned by host {host_id}",
                self.id
            )));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when the party is larger than the
    /// listing allows.
    pub fn ensure_capacity(&self, guests: u32) -> Result<(), DomainError> {
        if self.max_guests > 0 && guests > self.max_guests {
            return Err(DomainError::Validation(format!(
                "listing {} allows at most {} guests",
                self.id, self.max_guests
            )));
        }
        Ok(())
    }

    /// Snapshot of the current policy for `range`; no policy yields an empty
    /// snapshot (always free).
    #[must_use]
    pub fn policy_snapshot(&self, range: &DateRange) -> CancellationPolicySnapshot {
        self.cancellation_policy
            .as_ref()
            .map(|policy| policy.snapshot_for(range))
            .unwrap_or_default()
    }

    /// Folds one more review rating into the listing's summary.
    pub fn record_rating(&mut self, rating: u8) {
        self.rating.review_count = self.rating.review_count.saturating_add(1);
        self.rating.rating_total = self.rating.rating_total.saturating_add(u32::from(rating));
    }
}
