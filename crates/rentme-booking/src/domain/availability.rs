//! Per-listing availability calendar.

use rentme_core::error::DomainError;
use serde::{Deserialize, Serialize};

use super::date_range::DateRange;
use super::ids::ListingId;

/// Why a range is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Held by a confirmed booking.
    Booking,
    /// Closed by the host.
    HostBlock,
}

/// A blocked range with the reference that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub range: DateRange,
    pub reason: BlockReason,
    /// Booking id for [`BlockReason::Booking`], free text otherwise.
    pub reference: String,
}

/// Blocked ranges of one listing. Blocks never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCalendar {
    pub listing_id: ListingId,
    blocks: Vec<AvailabilityBlock>,
    /// Optimistic concurrency version; bumped by every save.
    pub version: i64,
}

impl AvailabilityCalendar {
    /// An empty, never-saved calendar.
    #[must_use]
    pub fn new(listing_id: ListingId) -> Self {
        Self {
            listing_id,
            blocks: Vec::new(),
            version: 0,
        }
    }

    /// Rebuilds a stored calendar.
    #[must_use]
    pub fn from_parts(listing_id: ListingId, blocks: Vec<AvailabilityBlock>, version: i64) -> Self {
        Self {
            listing_id,
            blocks,
            version,
        }
    }

    #[must_use]
    pub fn blocks(&self) -> &[AvailabilityBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn is_available(&self, range: &DateRange) -> bool {
        !self.blocks.iter().any(|block| block.range.overlaps(range))
    }

    /// Blocks `range`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if any night is already blocked.
    pub fn block(
        &mut self,
        range: DateRange,
        reason: BlockReason,
        reference: &str,
    ) -> Result<(), DomainError> {
        if !self.is_available(&range) {
            return Err(DomainError::Validation(format!(
                "listing {} is not available from {} to {}",
                self.listing_id,
                range.check_in(),
                range.check_out()
            )));
        }
        self.blocks.push(AvailabilityBlock {
            range,
            reason,
            reference: reference.to_owned(),
        });
        self.blocks.sort_by_key(|block| block.range.check_in());
        Ok(())
    }

    /// Blocks `range` for a booking.
    ///
    /// # Errors
    ///
    /// See [`AvailabilityCalendar::block`].
    pub fn reserve(&mut self, range: DateRange, booking_id: &str) -> Result<(), DomainError> {
        self.block(range, BlockReason::Booking, booking_id)
    }

    /// Removes every block created with `reference`; returns how many.
    pub fn release(&mut self, reference: &str) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|block| block.reference != reference);
        before - self.blocks.len()
    }
}
