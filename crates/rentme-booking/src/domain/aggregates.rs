//! Aggregate roots for the Booking context.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rentme_core::error::DomainError;
use rentme_core::event::EventLedger;
use serde::{Deserialize, Serialize};

use super::cancellation::{CancellationPolicySnapshot, RefundQuote};
use super::date_range::DateRange;
use super::events::{
    BookingAccepted, BookingCancelled, BookingConfirmed, BookingDeclined, BookingEvent,
    BookingEventKind, BookingRequested, CheckInCompleted, CheckOutCompleted, NoShowRecorded,
};
use super::ids::{BookingId, ListingId};
use super::pricing::PriceBreakdown;

/// Lifecycle state of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Pending,
    Accepted,
    Declined,
    Confirmed,
    Cancelled,
    CheckedIn,
    CheckedOut,
    Expired,
    NoShow,
}

impl BookingState {
    pub const ALL: [BookingState; 9] = [
        Self::Pending,
        Self::Accepted,
        Self::Declined,
        Self::Confirmed,
        Self::Cancelled,
        Self::CheckedIn,
        Self::CheckedOut,
        Self::Expired,
        Self::NoShow,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Declined => "DECLINED",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::CheckedIn => "CHECKED_IN",
            Self::CheckedOut => "CHECKED_OUT",
            Self::Expired => "EXPIRED",
            Self::NoShow => "NO_SHOW",
        }
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown booking state {s:?}")))
    }
}

/// Input to [`Booking::create`].
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub id: BookingId,
    pub listing_id: ListingId,
    pub guest_id: String,
    pub range: DateRange,
    pub guests: u32,
    pub price: PriceBreakdown,
    pub policy: CancellationPolicySnapshot,
    pub created_at: DateTime<Utc>,
    /// Permits a zero total (e.g. a fully discounted stay).
    pub allow_zero: bool,
}

/// One guest reservation.
///
/// State changes only through the transition methods; each successful
/// transition records exactly one event. A rejected transition changes
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub listing_id: ListingId,
    pub guest_id: String,
    pub range: DateRange,
    pub guests: u32,
    pub price: PriceBreakdown,
    pub state: BookingState,
    pub payment_hold: Option<String>,
    pub policy: CancellationPolicySnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of successful saves. Zero until first persisted.
    pub version: i64,
    #[serde(skip)]
    events: EventLedger<BookingEvent>,
}

impl Booking {
    /// Creates a `PENDING` booking and records `booking.requested`.
    ///
    /// # Errors
    ///
    /// Fails for zero guests, an empty guest id, an invalid price, or a
    /// non-positive total without `allow_zero`.
    pub fn create(params: CreateParams) -> Result<Self, DomainError> {
        let CreateParams {
            id,
            listing_id,
            guest_id,
            range,
            guests,
            mut price,
            policy,
            created_at,
            allow_zero,
        } = params;

        if guests == 0 {
            return Err(DomainError::Validation(
                "guests count must be positive".into(),
            ));
        }
        if guest_id.trim().is_empty() {
            return Err(DomainError::Validation("guest id is required".into()));
        }
        price.recalculate_total()?;
        if price.total.amount <= 0 && !allow_zero {
            return Err(DomainError::Validation("total must be positive".into()));
        }

        let mut booking = Self {
            id,
            listing_id,
            guest_id,
            range,
            guests,
            price,
            state: BookingState::Pending,
            payment_hold: None,
            policy,
            created_at,
            updated_at: created_at,
            version: 0,
            events: EventLedger::default(),
        };
        booking.record(
            created_at,
            BookingEventKind::Requested(BookingRequested {
                booking_id: booking.id.clone(),
                listing_id: booking.listing_id.clone(),
                guest_id: booking.guest_id.clone(),
                check_in: booking.range.check_in(),
                check_out: booking.range.check_out(),
                guests: booking.guests,
                quoted_price: booking.price.total.clone(),
            }),
        );
        Ok(booking)
    }

    /// Events recorded since the last drain.
    #[must_use]
    pub fn pending_events(&self) -> &[BookingEvent] {
        self.events.pending()
    }

    /// Drains recorded events, in emission order.
    pub fn take_events(&mut self) -> Vec<BookingEvent> {
        self.events.drain()
    }

    /// `PENDING -> ACCEPTED`.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state.
    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.require(&[BookingState::Pending], "accept")?;
        self.transition(
            BookingState::Accepted,
            now,
            BookingEventKind::Accepted(BookingAccepted {
                booking_id: self.id.clone(),
            }),
        );
        Ok(())
    }

    /// `PENDING | ACCEPTED -> DECLINED`.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state.
    pub fn decline(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.require(&[BookingState::Pending, BookingState::Accepted], "decline")?;
        self.transition(
            BookingState::Declined,
            now,
            BookingEventKind::Declined(BookingDeclined {
                booking_id: self.id.clone(),
                reason: reason.to_owned(),
            }),
        );
        Ok(())
    }

    /// `PENDING | ACCEPTED -> CONFIRMED`. A paid booking needs a payment
    /// hold reference.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state, or
    /// [`DomainError::PaymentHoldRequired`].
    pub fn confirm(&mut self, payment_hold: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.require(&[BookingState::Pending, BookingState::Accepted], "confirm")?;
        let hold = payment_hold.trim();
        if self.price.total.amount > 0 && hold.is_empty() {
            return Err(DomainError::PaymentHoldRequired);
        }
        self.payment_hold = (!hold.is_empty()).then(|| hold.to_owned());
        self.transition(
            BookingState::Confirmed,
            now,
            BookingEventKind::Confirmed(BookingConfirmed {
                booking_id: self.id.clone(),
                listing_id: self.listing_id.clone(),
                check_in: self.range.check_in(),
                check_out: self.range.check_out(),
                total: self.price.total.clone(),
            }),
        );
        Ok(())
    }

    /// `PENDING | ACCEPTED | CONFIRMED -> CANCELLED`, settling refund and
    /// penalty through the policy snapshot.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<RefundQuote, DomainError> {
        self.require(
            &[
                BookingState::Pending,
                BookingState::Accepted,
                BookingState::Confirmed,
            ],
            "cancel",
        )?;
        let quote = self
            .policy
            .calculate_refund(&self.price.total, now, self.range.check_in_at())?;
        self.transition(
            BookingState::Cancelled,
            now,
            BookingEventKind::Cancelled(BookingCancelled {
                booking_id: self.id.clone(),
                refund: quote.refund.clone(),
                penalty: quote.penalty.clone(),
                reason: reason.to_owned(),
            }),
        );
        Ok(quote)
    }

    /// `CONFIRMED -> CHECKED_IN`.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state.
    pub fn check_in(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.require(&[BookingState::Confirmed], "check in")?;
        self.transition(
            BookingState::CheckedIn,
            now,
            BookingEventKind::CheckInCompleted(CheckInCompleted {
                booking_id: self.id.clone(),
            }),
        );
        Ok(())
    }

    /// `CHECKED_IN -> CHECKED_OUT`.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state.
    pub fn check_out(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.require(&[BookingState::CheckedIn], "check out")?;
        self.transition(
            BookingState::CheckedOut,
            now,
            BookingEventKind::CheckOutCompleted(CheckOutCompleted {
                booking_id: self.id.clone(),
            }),
        );
        Ok(())
    }

    /// `CONFIRMED -> NO_SHOW`.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidStateTransition`] from any other state.
    pub fn mark_no_show(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.require(&[BookingState::Confirmed], "mark no-show")?;
        self.transition(
            BookingState::NoShow,
            now,
            BookingEventKind::NoShowRecorded(NoShowRecorded {
                booking_id: self.id.clone(),
            }),
        );
        Ok(())
    }

    fn require(&self, allowed: &[BookingState], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.state, action))
        }
    }

    fn transition(&mut self, to: BookingState, now: DateTime<Utc>, kind: BookingEventKind) {
        self.state = to;
        self.updated_at = now;
        self.record(now, kind);
    }

    fn record(&mut self, now: DateTime<Utc>, kind: BookingEventKind) {
        let event = BookingEvent::new(&self.id, now, kind);
        self.events.record(event);
    }
}
