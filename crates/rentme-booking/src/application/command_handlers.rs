//! Command handlers for the Booking context.
//!
//! Each handler is a free function over the unit's repositories: load the
//! aggregate, run the transition, save, and hand the drained events back.
//! [`BookingHandlers`] adapts them to the bus and stages the events on the
//! request's outbox.

use std::sync::Arc;

use async_trait::async_trait;
use rentme_bus::bus::CommandHandler;
use rentme_bus::outbox::stage_events;
use rentme_bus::Command;
use rentme_core::clock::Clock;
use rentme_core::error::DomainError;
use tracing::info;

use super::BookingContext;
use crate::domain::aggregates::{Booking, CreateParams};
use crate::domain::commands::{
    AcceptBooking, BookingActionResult, CancelBooking, CancelBookingResult, CheckInBooking,
    CheckOutBooking, ConfirmBooking, DeclineBooking, MarkNoShow, RequestBooking,
    RequestBookingResult, SubmitReview, SubmitReviewResult,
};
use crate::domain::date_range::DateRange;
use crate::domain::events::BookingEvent;
use crate::domain::ids::{BookingId, HostId};
use crate::domain::review::Review;
use crate::ports::BookingUnitOfWork;

/// A handler's result together with the events it produced.
#[derive(Debug)]
pub struct Handled<T> {
    pub output: T,
    pub events: Vec<BookingEvent>,
}

impl<T> Handled<T> {
    fn new(output: T, booking: &mut Booking) -> Self {
        Self {
            output,
            events: booking.take_events(),
        }
    }
}

/// Handles `RequestBooking`: prices the stay against the listing and
/// creates a `PENDING` booking.
///
/// # Errors
///
/// Returns `DomainError` for an unknown listing, an oversized party, dates in
/// the past or already blocked, or a failed save.
pub async fn handle_request_booking(
    command: &RequestBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<RequestBookingResult>, DomainError> {
    let listing = unit.listings().by_id(&command.listing_id).await?;
    listing.ensure_capacity(command.guests)?;

    let range = DateRange::new(command.check_in, command.check_out)?;
    range.ensure_not_past(clock.today())?;
    let calendar = unit.availability().by_listing(&listing.id).await?;
    if !calendar.is_available(&range) {
        return Err(DomainError::Validation(format!(
            "listing {} is not available from {} to {}",
            listing.id,
            range.check_in(),
            range.check_out()
        )));
    }

    let price = unit.pricing().quote(&listing, &range, command.guests).await?;
    let mut booking = Booking::create(CreateParams {
        id: command
            .booking_id
            .clone()
            .unwrap_or_else(BookingId::generate),
        listing_id: listing.id.clone(),
        guest_id: command.guest_id.trim().to_owned(),
        range,
        guests: command.guests,
        price,
        policy: listing.policy_snapshot(&range),
        created_at: clock.now(),
        allow_zero: false,
    })?;
    unit.bookings().save(&mut booking).await?;

    info!(
        booking_id = %booking.id,
        listing_id = %booking.listing_id,
        total = booking.price.total.amount,
        "booking requested"
    );
    let output = RequestBookingResult {
        booking_id: booking.id.clone(),
    };
    Ok(Handled::new(output, &mut booking))
}

/// Loads a booking on behalf of the host owning its listing, applies
/// `transition`, and saves it.
async fn host_transition<F>(
    unit: &dyn BookingUnitOfWork,
    host_id: &HostId,
    booking_id: &BookingId,
    transition: F,
) -> Result<Booking, DomainError>
where
    F: FnOnce(&mut Booking) -> Result<(), DomainError> + Send,
{
    let mut booking = unit.bookings().by_id(booking_id).await?;
    let listing = unit.listings().by_id(&booking.listing_id).await?;
    listing.ensure_owned_by(host_id)?;
    transition(&mut booking)?;
    unit.bookings().save(&mut booking).await?;
    info!(
        booking_id = %booking.id,
        host_id = %host_id,
        status = %booking.state,
        "host booking updated"
    );
    Ok(booking)
}

fn action_result(booking: &mut Booking) -> Handled<BookingActionResult> {
    let output = BookingActionResult {
        booking_id: booking.id.clone(),
        status: booking.state,
    };
    Handled::new(output, booking)
}

/// Handles `AcceptBooking`.
///
/// # Errors
///
/// Returns `DomainError::Forbidden` for a foreign listing, or any load,
/// transition or save failure.
pub async fn handle_accept_booking(
    command: &AcceptBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<BookingActionResult>, DomainError> {
    let now = clock.now();
    let mut booking =
        host_transition(unit, &command.host_id, &command.booking_id, |b| b.accept(now)).await?;
    Ok(action_result(&mut booking))
}

/// Handles `DeclineBooking`.
///
/// # Errors
///
/// See [`handle_accept_booking`].
pub async fn handle_decline_booking(
    command: &DeclineBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<BookingActionResult>, DomainError> {
    let now = clock.now();
    let reason = command.reason();
    let mut booking = host_transition(unit, &command.host_id, &command.booking_id, |b| {
        b.decline(reason, now)
    })
    .await?;
    Ok(action_result(&mut booking))
}

/// Handles `ConfirmBooking`: confirms, then reserves the stay on the
/// listing's calendar.
///
/// # Errors
///
/// See [`handle_accept_booking`]; additionally fails when the dates were
/// blocked in the meantime.
pub async fn handle_confirm_booking(
    command: &ConfirmBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<BookingActionResult>, DomainError> {
    let now = clock.now();
    let hold = command.payment_hold_id.as_deref().unwrap_or_default();
    let mut booking = host_transition(unit, &command.host_id, &command.booking_id, |b| {
        b.confirm(hold, now)
    })
    .await?;

    let mut calendar = unit.availability().by_listing(&booking.listing_id).await?;
    calendar.reserve(booking.range, booking.id.as_str())?;
    unit.availability().save(&mut calendar).await?;

    Ok(action_result(&mut booking))
}

/// Handles `CancelBooking`: settles the refund and frees the calendar.
///
/// # Errors
///
/// Returns `DomainError::Forbidden` when the caller is not the booking's
/// guest, or any load, transition or save failure.
pub async fn handle_cancel_booking(
    command: &CancelBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<CancelBookingResult>, DomainError> {
    let mut booking = unit.bookings().by_id(&command.booking_id).await?;
    if booking.guest_id != command.guest_id.trim() {
        return Err(DomainError::Forbidden(format!(
            "booking {} does not belong to guest {}",
            booking.id, command.guest_id
        )));
    }
    let quote = booking.cancel(command.reason.trim(), clock.now())?;
    unit.bookings().save(&mut booking).await?;

    let mut calendar = unit.availability().by_listing(&booking.listing_id).await?;
    if calendar.release(booking.id.as_str()) > 0 {
        unit.availability().save(&mut calendar).await?;
    }

    info!(
        booking_id = %booking.id,
        refund = quote.refund.amount,
        penalty = quote.penalty.amount,
        "booking cancelled"
    );
    let output = CancelBookingResult {
        booking_id: booking.id.clone(),
        status: booking.state,
        refund: quote.refund,
        penalty: quote.penalty,
    };
    Ok(Handled::new(output, &mut booking))
}

/// Handles `CheckInBooking`.
///
/// # Errors
///
/// See [`handle_accept_booking`].
pub async fn handle_check_in(
    command: &CheckInBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<BookingActionResult>, DomainError> {
    let now = clock.now();
    let mut booking =
        host_transition(unit, &command.host_id, &command.booking_id, |b| b.check_in(now)).await?;
    Ok(action_result(&mut booking))
}

/// Handles `CheckOutBooking`.
///
/// # Errors
///
/// See [`handle_accept_booking`].
pub async fn handle_check_out(
    command: &CheckOutBooking,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<BookingActionResult>, DomainError> {
    let now = clock.now();
    let mut booking =
        host_transition(unit, &command.host_id, &command.booking_id, |b| b.check_out(now)).await?;
    Ok(action_result(&mut booking))
}

/// Handles `MarkNoShow`.
///
/// # Errors
///
/// See [`handle_accept_booking`].
pub async fn handle_mark_no_show(
    command: &MarkNoShow,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<BookingActionResult>, DomainError> {
    let now = clock.now();
    let mut booking = host_transition(unit, &command.host_id, &command.booking_id, |b| {
        b.mark_no_show(now)
    })
    .await?;
    Ok(action_result(&mut booking))
}

/// Handles `SubmitReview`: stores the guest's review of a finished stay and
/// folds the rating into the listing's summary.
///
/// # Errors
///
/// Returns `DomainError::Forbidden` when the caller is not the booking's
/// guest, `DomainError::Validation` before check-out or for a second review,
/// or any load or save failure.
pub async fn handle_submit_review(
    command: &SubmitReview,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Handled<SubmitReviewResult>, DomainError> {
    let now = clock.now();
    let booking = unit.bookings().by_id(&command.booking_id).await?;
    let guest_id = command.guest_id.trim();
    if booking.guest_id != guest_id {
        return Err(DomainError::Forbidden(format!(
            "booking {} does not belong to guest {guest_id}",
            booking.id
        )));
    }
    if booking.range.check_out_at() > now {
        return Err(DomainError::Validation(format!(
            "stay of booking {} is not finished yet",
            booking.id
        )));
    }
    if unit.reviews().by_booking(&booking.id).await?.is_some() {
        return Err(DomainError::Validation(format!(
            "booking {} is already reviewed",
            booking.id
        )));
    }

    let review = Review::new(
        booking.id.clone(),
        booking.listing_id.clone(),
        guest_id,
        command.rating,
        &command.comment,
        now,
    )?;
    unit.reviews().save(&review).await?;

    let mut listing = unit.listings().by_id(&booking.listing_id).await?;
    listing.record_rating(review.rating);
    unit.listings().save(&mut listing).await?;

    info!(
        booking_id = %booking.id,
        listing_id = %listing.id,
        rating = review.rating,
        "review submitted"
    );
    Ok(Handled {
        output: SubmitReviewResult {
            review_id: review.id,
            booking_id: review.booking_id,
            listing_id: review.listing_id,
            rating: review.rating,
        },
        events: Vec::new(),
    })
}

/// Bus adapter for the handler functions above.
#[derive(Clone)]
pub struct BookingHandlers {
    clock: Arc<dyn Clock>,
}

impl BookingHandlers {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

macro_rules! command_handler {
    ($($command:ty => $handle:ident),+ $(,)?) => {
        $(
            #[async_trait]
            impl CommandHandler<$command, dyn BookingUnitOfWork> for BookingHandlers {
                async fn handle(
                    &self,
                    ctx: &mut BookingContext,
                    command: $command,
                ) -> Result<<$command as Command>::Output, DomainError> {
                    let unit = Arc::clone(ctx.uow()?);
                    let handled = $handle(&command, self.clock.as_ref(), &*unit).await?;
                    stage_events(ctx, &handled.events).await?;
                    Ok(handled.output)
                }
            }
        )+
    };
}

command_handler! {
    RequestBooking => handle_request_booking,
    AcceptBooking => handle_accept_booking,
    DeclineBooking => handle_decline_booking,
    ConfirmBooking => handle_confirm_booking,
    CancelBooking => handle_cancel_booking,
    CheckInBooking => handle_check_in,
    CheckOutBooking => handle_check_out,
    MarkNoShow => handle_mark_no_show,
    SubmitReview => handle_submit_review,
}
