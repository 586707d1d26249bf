//! Commands for the Booking context.
//!
//! Each command carries its routing key and result shape. Guest-issued
//! writes that a client may retry after a timeout accept an idempotency key.

use chrono::NaiveDate;
use rentme_bus::Command;
use rentme_core::error::DomainError;
use rentme_core::money::Money;
use serde::{Deserialize, Serialize};

use super::aggregates::BookingState;
use super::date_range::DateRange;
use super::ids::{BookingId, HostId, ListingId};

/// Reason recorded when a host declines without giving one.
pub const DEFAULT_DECLINE_REASON: &str = "host-declined";

/// Result of [`RequestBooking`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBookingResult {
    pub booking_id: BookingId,
}

/// Result of a host-side lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingActionResult {
    pub booking_id: BookingId,
    pub status: BookingState,
}

/// Result of [`CancelBooking`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBookingResult {
    pub booking_id: BookingId,
    pub status: BookingState,
    pub refund: Money,
    pub penalty: Money,
}

/// Result of [`SubmitReview`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReviewResult {
    pub review_id: String,
    pub booking_id: BookingId,
    pub listing_id: ListingId,
    pub rating: u8,
}

/// Guest asks to stay at a listing.
#[derive(Debug, Clone)]
pub struct RequestBooking {
    /// Caller-chosen id; generated when absent.
    pub booking_id: Option<BookingId>,
    pub listing_id: ListingId,
    pub guest_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub idempotency_key: Option<String>,
}

impl Command for RequestBooking {
    const KEY: &'static str = "booking.request";
    type Output = RequestBookingResult;

    fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.listing_id.as_str().trim().is_empty() {
            return Err(DomainError::Validation("listing id is required".into()));
        }
        if self.guest_id.trim().is_empty() {
            return Err(DomainError::Validation("guest id is required".into()));
        }
        if self.guests == 0 {
            return Err(DomainError::Validation(
                "guests count must be positive".into(),
            ));
        }
        DateRange::new(self.check_in, self.check_out).map(|_| ())
    }
}

/// Host accepts a pending request.
#[derive(Debug, Clone)]
pub struct AcceptBooking {
    pub host_id: HostId,
    pub booking_id: BookingId,
}

impl Command for AcceptBooking {
    const KEY: &'static str = "host.bookings.accept";
    type Output = BookingActionResult;
}

/// Host turns a request down.
#[derive(Debug, Clone)]
pub struct DeclineBooking {
    pub host_id: HostId,
    pub booking_id: BookingId,
    /// Empty means [`DEFAULT_DECLINE_REASON`].
    pub reason: String,
}

impl DeclineBooking {
    #[must_use]
    pub fn reason(&self) -> &str {
        match self.reason.trim() {
            "" => DEFAULT_DECLINE_REASON,
            reason => reason,
        }
    }
}

impl Command for DeclineBooking {
    const KEY: &'static str = "host.bookings.decline";
    type Output = BookingActionResult;
}

/// Host confirms a booking, reserving the dates on the calendar.
#[derive(Debug, Clone)]
pub struct ConfirmBooking {
    pub host_id: HostId,
    pub booking_id: BookingId,
    /// Payment authorisation reference; required for paid stays.
    pub payment_hold_id: Option<String>,
}

impl Command for ConfirmBooking {
    const KEY: &'static str = "host.bookings.confirm";
    type Output = BookingActionResult;
}

/// Guest cancels, releasing the dates and settling the refund.
#[derive(Debug, Clone)]
pub struct CancelBooking {
    pub guest_id: String,
    pub booking_id: BookingId,
    pub reason: String,
    pub idempotency_key: Option<String>,
}

impl Command for CancelBooking {
    const KEY: &'static str = "booking.cancel";
    type Output = CancelBookingResult;

    fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.guest_id.trim().is_empty() {
            return Err(DomainError::Validation("guest id is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CheckInBooking {
    pub host_id: HostId,
    pub booking_id: BookingId,
}

impl Command for CheckInBooking {
    const KEY: &'static str = "host.bookings.check_in";
    type Output = BookingActionResult;
}

#[derive(Debug, Clone)]
pub struct CheckOutBooking {
    pub host_id: HostId,
    pub booking_id: BookingId,
}

impl Command for CheckOutBooking {
    const KEY: &'static str = "host.bookings.check_out";
    type Output = BookingActionResult;
}

/// Host records that the guest never arrived.
#[derive(Debug, Clone)]
pub struct MarkNoShow {
    pub host_id: HostId,
    pub booking_id: BookingId,
}

impl Command for MarkNoShow {
    const KEY: &'static str = "host.bookings.no_show";
    type Output = BookingActionResult;
}

/// Guest reviews a finished stay. The listing's rating summary is updated in
/// the same unit of work.
#[derive(Debug, Clone)]
pub struct SubmitReview {
    pub guest_id: String,
    pub booking_id: BookingId,
    pub rating: u8,
    pub comment: String,
    pub idempotency_key: Option<String>,
}

impl Command for SubmitReview {
    const KEY: &'static str = "reviews.submit";
    type Output = SubmitReviewResult;

    fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.guest_id.trim().is_empty() {
            return Err(DomainError::Validation("guest id is required".into()));
        }
        if !(1..=5).contains(&self.rating) {
            return Err(DomainError::Validation(
                "rating must be between 1 and 5".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestBooking {
        RequestBooking {
            booking_id: None,
            listing_id: "l1".into(),
            guest_id: "g1".into(),
            check_in: NaiveDate::from_ymd_opt(2026, 6, 10).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2026, 6, 12).unwrap(),
            guests: 2,
            idempotency_key: Some("req-42".into()),
        }
    }

    #[test]
    fn test_request_booking_validates_input() {
        assert!(request().validate().is_ok());

        let mut no_guests = request();
        no_guests.guests = 0;
        assert!(matches!(no_guests.validate(), Err(DomainError::Validation(_))));

        let mut inverted = request();
        inverted.check_out = inverted.check_in;
        assert!(matches!(inverted.validate(), Err(DomainError::Validation(_))));

        let mut anonymous = request();
        anonymous.guest_id = String::new();
        assert!(anonymous.validate().is_err());
    }

    #[test]
    fn test_submit_review_validates_rating() {
        let mut review = SubmitReview {
            guest_id: "g1".into(),
            booking_id: "b1".into(),
            rating: 0,
            comment: String::new(),
            idempotency_key: None,
        };
        assert!(matches!(review.validate(), Err(DomainError::Validation(_))));

        review.rating = 5;
        assert!(review.validate().is_ok());
    }

    #[test]
    fn test_decline_reason_defaults_when_blank() {
        let mut decline = DeclineBooking {
            host_id: "h1".into(),
            booking_id: "b1".into(),
            reason: "  ".into(),
        };
        assert_eq!(decline.reason(), DEFAULT_DECLINE_REASON);

        decline.reason = "renovation".into();
        assert_eq!(decline.reason(), "renovation");
    }

    #[test]
    fn test_request_result_serializes_as_plain_booking_id() {
        let result = RequestBookingResult {
            booking_id: "b1".into(),
        };

        let json = serde_json::to_string(&result).unwrap();

        assert_eq!(json, r#"{"booking_id":"b1"}"#);
    }
}
