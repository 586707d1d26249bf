//! Domain events for the Booking context.

use chrono::NaiveDate;
use rentme_core::error::DomainError;
use rentme_core::event::{DomainEvent, EventMetadata};
use rentme_core::money::Money;
use serde::Serialize;

use super::ids::{BookingId, ListingId};

/// Emitted when a guest requests a stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingRequested {
    pub booking_id: BookingId,
    pub listing_id: ListingId,
    pub guest_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub quoted_price: Money,
}

/// Emitted when the host accepts a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingAccepted {
    pub booking_id: BookingId,
}

/// Emitted when the host declines a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingDeclined {
    pub booking_id: BookingId,
    pub reason: String,
}

/// Emitted when payment is held and the stay is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmed {
    pub booking_id: BookingId,
    pub listing_id: ListingId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub total: Money,
}

/// Emitted when a booking is cancelled, with the computed settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingCancelled {
    pub booking_id: BookingId,
    pub refund: Money,
    pub penalty: Money,
    pub reason: String,
}

/// Emitted when the guest checks in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInCompleted {
    pub booking_id: BookingId,
}

/// Emitted when the guest checks out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutCompleted {
    pub booking_id: BookingId,
}

/// Emitted when a confirmed guest never arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoShowRecorded {
    pub booking_id: BookingId,
}

pub const BOOKING_REQUESTED_EVENT_TYPE: &str = "booking.requested";
pub const BOOKING_ACCEPTED_EVENT_TYPE: &str = "booking.accepted";
pub const BOOKING_DECLINED_EVENT_TYPE: &str = "booking.declined";
pub const BOOKING_CONFIRMED_EVENT_TYPE: &str = "booking.confirmed";
pub const BOOKING_CANCELLED_EVENT_TYPE: &str = "booking.cancelled";
pub const CHECK_IN_COMPLETED_EVENT_TYPE: &str = "booking.checkin_completed";
pub const CHECK_OUT_COMPLETED_EVENT_TYPE: &str = "booking.checkout_completed";
pub const NO_SHOW_RECORDED_EVENT_TYPE: &str = "booking.no_show";

/// Event payload variants for the Booking context. Serialized without a tag:
/// the event name travels beside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BookingEventKind {
    Requested(BookingRequested),
    Accepted(BookingAccepted),
    Declined(BookingDeclined),
    Confirmed(BookingConfirmed),
    Cancelled(BookingCancelled),
    CheckInCompleted(CheckInCompleted),
    CheckOutCompleted(CheckOutCompleted),
    NoShowRecorded(NoShowRecorded),
}

impl BookingEventKind {
    /// The dotted event name of this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Requested(_) => BOOKING_REQUESTED_EVENT_TYPE,
            Self::Accepted(_) => BOOKING_ACCEPTED_EVENT_TYPE,
            Self::Declined(_) => BOOKING_DECLINED_EVENT_TYPE,
            Self::Confirmed(_) => BOOKING_CONFIRMED_EVENT_TYPE,
            Self::Cancelled(_) => BOOKING_CANCELLED_EVENT_TYPE,
            Self::CheckInCompleted(_) => CHECK_IN_COMPLETED_EVENT_TYPE,
            Self::CheckOutCompleted(_) => CHECK_OUT_COMPLETED_EVENT_TYPE,
            Self::NoShowRecorded(_) => NO_SHOW_RECORDED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the Booking context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingEvent {
    pub metadata: EventMetadata,
    pub kind: BookingEventKind,
}

impl BookingEvent {
    /// Wraps `kind` with fresh metadata.
    #[must_use]
    pub fn new(
        booking_id: &BookingId,
        occurred_at: chrono::DateTime<chrono::Utc>,
        kind: BookingEventKind,
    ) -> Self {
        Self {
            metadata: EventMetadata::new(kind.event_type(), booking_id.as_str(), occurred_at),
            kind,
        }
    }
}

impl DomainEvent for BookingEvent {
    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(&self.kind).map_err(|e| DomainError::Decode(e.to_string()))
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload_is_untagged_event_body() {
        // Arrange
        let event = BookingEvent::new(
            &"b1".into(),
            Utc::now(),
            BookingEventKind::Declined(BookingDeclined {
                booking_id: "b1".into(),
                reason: "host-declined".into(),
            }),
        );

        // Act
        let payload = event.to_payload().unwrap();

        // Assert
        assert_eq!(event.event_type(), "booking.declined");
        assert_eq!(event.metadata.aggregate_id, "b1");
        assert_eq!(
            payload,
            json!({ "booking_id": "b1", "reason": "host-declined" })
        );
    }
}
