//! Persistence and pricing ports of the Booking context.
//!
//! Every repository handed out by a [`BookingUnitOfWork`] reads and writes
//! inside that unit's transaction. Saves are optimistic: the caller's
//! `version` must equal the stored one, and a successful save bumps it.

use async_trait::async_trait;
use rentme_bus::uow::UnitOfWork;
use rentme_core::error::DomainError;

use crate::domain::aggregates::Booking;
use crate::domain::availability::AvailabilityCalendar;
use crate::domain::date_range::DateRange;
use crate::domain::ids::{BookingId, HostId, ListingId};
use crate::domain::listing::Listing;
use crate::domain::pricing::PriceBreakdown;
use crate::domain::review::Review;

#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id.
    async fn by_id(&self, id: &ListingId) -> Result<Listing, DomainError>;

    /// Listings owned by `host_id`, in id order.
    async fn list_by_host(&self, host_id: &HostId) -> Result<Vec<Listing>, DomainError>;

    /// Inserts (version 0) or updates the listing.
    async fn save(&self, listing: &mut Listing) -> Result<(), DomainError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id.
    async fn by_id(&self, id: &BookingId) -> Result<Booking, DomainError>;

    /// Inserts (version 0) or updates the booking. Pending events are not
    /// persisted here; they travel through the outbox.
    ///
    /// # Errors
    ///
    /// [`DomainError::ConcurrencyConflict`] if the stored version moved on.
    async fn save(&self, booking: &mut Booking) -> Result<(), DomainError>;

    async fn list_by_guest(&self, guest_id: &str) -> Result<Vec<Booking>, DomainError>;

    async fn list_by_listing(&self, listing_id: &ListingId) -> Result<Vec<Booking>, DomainError>;
}

#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// The listing's calendar; an empty version-0 calendar if none was saved.
    async fn by_listing(&self, listing_id: &ListingId)
    -> Result<AvailabilityCalendar, DomainError>;

    /// # Errors
    ///
    /// [`DomainError::ConcurrencyConflict`] if the stored version moved on.
    async fn save(&self, calendar: &mut AvailabilityCalendar) -> Result<(), DomainError>;
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn by_booking(&self, booking_id: &BookingId) -> Result<Option<Review>, DomainError>;

    async fn save(&self, review: &Review) -> Result<(), DomainError>;
}

/// Quotes a stay.
#[async_trait]
pub trait PricingPort: Send + Sync {
    async fn quote(
        &self,
        listing: &Listing,
        range: &DateRange,
        guests: u32,
    ) -> Result<PriceBreakdown, DomainError>;
}

/// The transaction scope booking handlers run in.
pub trait BookingUnitOfWork: UnitOfWork {
    fn listings(&self) -> &dyn ListingRepository;
    fn bookings(&self) -> &dyn BookingRepository;
    fn availability(&self) -> &dyn AvailabilityRepository;
    fn pricing(&self) -> &dyn PricingPort;
    fn reviews(&self) -> &dyn ReviewRepository;
}
