//! Query handlers for the Booking context.
//!
//! Queries run inside a read-only unit and only ever read through it.

use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use rentme_bus::bus::QueryHandler;
use rentme_bus::Query;
use rentme_core::clock::Clock;
use rentme_core::error::DomainError;
use tracing::debug;

use super::BookingContext;
use crate::domain::queries::{
    BookingView, GetBooking, GuestBookingSummary, HostBookingSummary, ListGuestBookings,
    ListHostBookings,
};
use crate::ports::BookingUnitOfWork;

/// Retrieves one booking.
///
/// # Errors
///
/// Returns `DomainError::NotFound` for an unknown id.
pub async fn get_booking(
    query: &GetBooking,
    unit: &dyn BookingUnitOfWork,
) -> Result<BookingView, DomainError> {
    let booking = unit.bookings().by_id(&query.booking_id).await?;
    Ok(BookingView::from(&booking))
}

/// Lists a guest's bookings, newest first. A stay can be reviewed once its
/// check-out has passed and no review exists yet.
///
/// # Errors
///
/// Returns `DomainError` if any repository read fails. A listing that no
/// longer exists only drops the title.
pub async fn list_guest_bookings(
    query: &ListGuestBookings,
    clock: &dyn Clock,
    unit: &dyn BookingUnitOfWork,
) -> Result<Vec<GuestBookingSummary>, DomainError> {
    let guest_id = query.guest_id.trim();
    if guest_id.is_empty() {
        return Err(DomainError::Validation("guest id is required".into()));
    }
    let now = clock.now();
    let mut bookings = unit.bookings().list_by_guest(guest_id).await?;
    bookings.sort_by_key(|booking| Reverse(booking.created_at));

    let mut items = Vec::with_capacity(bookings.len());
    for booking in &bookings {
        let listing_title = match unit.listings().by_id(&booking.listing_id).await {
            Ok(listing) => Some(listing.title),
            Err(DomainError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let can_review = booking.range.check_out_at() <= now
            && unit.reviews().by_booking(&booking.id).await?.is_none();
        items.push(GuestBookingSummary {
            booking: BookingView::from(booking),
            listing_title,
            can_review,
        });
    }
    debug!(guest_id, count = items.len(), "guest bookings listed");
    Ok(items)
}

/// Lists bookings across every listing the host owns, newest first.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an unknown status filter, or any
/// repository failure.
pub async fn list_host_bookings(
    query: &ListHostBookings,
    unit: &dyn BookingUnitOfWork,
) -> Result<Vec<HostBookingSummary>, DomainError> {
    let filter = query.state_filter()?;
    let listings = unit.listings().list_by_host(&query.host_id).await?;

    let mut items = Vec::new();
    for listing in &listings {
        let bookings = unit.bookings().list_by_listing(&listing.id).await?;
        items.extend(
            bookings
                .iter()
                .filter(|booking| filter.is_none_or(|state| booking.state == state))
                .map(|booking| HostBookingSummary {
                    booking: BookingView::from(booking),
                    listing_title: listing.title.clone(),
                }),
        );
    }
    items.sort_by_key(|item| Reverse(item.booking.created_at));
    debug!(
        host_id = %query.host_id,
        count = items.len(),
        "host bookings listed"
    );
    Ok(items)
}

/// Bus adapter for the query functions above.
#[derive(Clone)]
pub struct BookingQueries {
    clock: Arc<dyn Clock>,
}

impl BookingQueries {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl QueryHandler<GetBooking, dyn BookingUnitOfWork> for BookingQueries {
    async fn handle(
        &self,
        ctx: &mut BookingContext,
        query: GetBooking,
    ) -> Result<<GetBooking as Query>::Output, DomainError> {
        get_booking(&query, &**ctx.uow()?).await
    }
}

#[async_trait]
impl QueryHandler<ListGuestBookings, dyn BookingUnitOfWork> for BookingQueries {
    async fn handle(
        &self,
        ctx: &mut BookingContext,
        query: ListGuestBookings,
    ) -> Result<<ListGuestBookings as Query>::Output, DomainError> {
        list_guest_bookings(&query, self.clock.as_ref(), &**ctx.uow()?).await
    }
}

#[async_trait]
impl QueryHandler<ListHostBookings, dyn BookingUnitOfWork> for BookingQueries {
    async fn handle(
        &self,
        ctx: &mut BookingContext,
        query: ListHostBookings,
    ) -> Result<<ListHostBookings as Query>::Output, DomainError> {
        list_host_bookings(&query, &**ctx.uow()?).await
    }
}
