//! Default pricing: the listing's own rate card.

use async_trait::async_trait;
use rentme_core::error::DomainError;

use crate::domain::date_range::DateRange;
use crate::domain::listing::Listing;
use crate::domain::pricing::PriceBreakdown;
use crate::ports::PricingPort;

/// Nightly rate times nights, plus the listing's cleaning fee if it has one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingRatePricing;

#[async_trait]
impl PricingPort for ListingRatePricing {
    async fn quote(
        &self,
        listing: &Listing,
        range: &DateRange,
        _guests: u32,
    ) -> Result<PriceBreakdown, DomainError> {
        let breakdown = PriceBreakdown::new(range.nights(), listing.nightly_rate.clone())?;
        match &listing.cleaning_fee {
            Some(fee) if !fee.is_zero() => breakdown.with_fee("cleaning", fee.clone()),
            _ => Ok(breakdown),
        }
    }
}
