//! Guest reviews, as far as booking needs them.

use chrono::{DateTime, Utc};
use rentme_core::error::DomainError;
use serde::{Deserialize, Serialize};

use super::ids::{BookingId, ListingId};

/// A guest's review of a completed stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub booking_id: BookingId,
    pub listing_id: ListingId,
    pub guest_id: String,
    /// 1 to 5.
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a rating outside 1..=5.
    pub fn new(
        booking_id: BookingId,
        listing_id: ListingId,
        guest_id: &str,
        rating: u8,
        comment: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !(1..=5).contains(&rating) {
            return Err(DomainError::Validation(
                "rating must be between 1 and 5".into(),
            ));
        }
        Ok(Self {
            id: uuid::Uuid::now_v7().to_string(),
            booking_id,
            listing_id,
            guest_id: guest_id.to_owned(),
            rating,
            comment: comment.trim().to_owned(),
            created_at,
        })
    }
}
