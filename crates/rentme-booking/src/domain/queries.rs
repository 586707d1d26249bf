//! Queries and read models for the Booking context.

use chrono::{DateTime, NaiveDate, Utc};
use rentme_bus::Query;
use rentme_core::error::DomainError;
use rentme_core::money::Money;
use serde::Serialize;

use super::aggregates::{Booking, BookingState};
use super::ids::{BookingId, HostId, ListingId};

/// Host list filter meaning "every state".
pub const ALL_STATES_FILTER: &str = "ALL";

/// Read-only view of a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub booking_id: BookingId,
    pub listing_id: ListingId,
    pub guest_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: i64,
    pub guests: u32,
    pub status: BookingState,
    pub total: Money,
    pub payment_hold: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl From<&Booking> for BookingView {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id.clone(),
            listing_id: booking.listing_id.clone(),
            guest_id: booking.guest_id.clone(),
            check_in: booking.range.check_in(),
            check_out: booking.range.check_out(),
            nights: booking.range.nights(),
            guests: booking.guests,
            status: booking.state,
            total: booking.price.total.clone(),
            payment_hold: booking.payment_hold.clone(),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
            version: booking.version,
        }
    }
}

/// A guest's booking with what the guest may still do about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestBookingSummary {
    pub booking: BookingView,
    /// `None` if the listing has since disappeared.
    pub listing_title: Option<String>,
    /// The stay is over and has not been reviewed yet.
    pub can_review: bool,
}

/// A booking on one of the host's listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostBookingSummary {
    pub booking: BookingView,
    pub listing_title: String,
}

#[derive(Debug, Clone)]
pub struct GetBooking {
    pub booking_id: BookingId,
}

impl Query for GetBooking {
    const KEY: &'static str = "booking.get";
    type Output = BookingView;
}

/// Every booking of one guest, newest first.
#[derive(Debug, Clone)]
pub struct ListGuestBookings {
    pub guest_id: String,
}

impl Query for ListGuestBookings {
    const KEY: &'static str = "me.bookings.list";
    type Output = Vec<GuestBookingSummary>;
}

/// Bookings across a host's listings, newest first.
#[derive(Debug, Clone)]
pub struct ListHostBookings {
    pub host_id: HostId,
    /// A state name, or [`ALL_STATES_FILTER`]. Defaults to `PENDING`.
    pub status: Option<String>,
}

impl ListHostBookings {
    /// The states the listing is restricted to; `None` means all.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for an unknown state name.
    pub fn state_filter(&self) -> Result<Option<BookingState>, DomainError> {
        let raw = self
            .status
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_ascii_uppercase();
        match raw.as_str() {
            "" => Ok(Some(BookingState::Pending)),
            ALL_STATES_FILTER => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl Query for ListHostBookings {
    const KEY: &'static str = "host.bookings.list";
    type Output = Vec<HostBookingSummary>;
}
