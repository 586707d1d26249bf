//! In-process unit of work for handler tests. Writes apply immediately and
//! commit is a no-op.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rentme_bus::outbox::Outbox;
use rentme_bus::uow::UnitOfWork;
use rentme_core::error::DomainError;
use rentme_core::money::Money;
use rentme_test_support::RecordingOutbox;

use super::pricing::ListingRatePricing;
use crate::domain::aggregates::{Booking, BookingState, CreateParams};
use crate::domain::availability::AvailabilityCalendar;
use crate::domain::date_range::DateRange;
use crate::domain::ids::{BookingId, HostId, ListingId};
use crate::domain::listing::{CancellationPolicy, Listing};
use crate::domain::pricing::PriceBreakdown;
use crate::domain::review::Review;
use crate::ports::{
    AvailabilityRepository, BookingRepository, BookingUnitOfWork, ListingRepository,
    PricingPort, ReviewRepository,
};

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

pub(crate) fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, day).unwrap()
}

/// `l1`, owned by `h1`: 5,000 a night plus a 1,000 cleaning fee.
pub(crate) fn listing() -> Listing {
    Listing {
        id: "l1".into(),
        host_id: "h1".into(),
        title: "Harbour loft".into(),
        nightly_rate: Money::new(5_000, "XTS").unwrap(),
        cleaning_fee: Some(Money::new(1_000, "XTS").unwrap()),
        max_guests: 4,
        cancellation_policy: Some(CancellationPolicy {
            id: "moderate".into(),
            free_cancellation_hours: 48,
            pre_check_in_penalty_percent: 20,
            post_check_in_penalty_percent: 100,
        }),
        rating: Default::default(),
        version: 0,
    }
}

/// A two-night stay of `g1` at `l1` from June 10th, already in `state`.
pub(crate) fn booking(id: &str, state: BookingState, created_at: DateTime<Utc>) -> Booking {
    let listing = listing();
    let range = DateRange::new(date(10), date(12)).unwrap();
    let price = PriceBreakdown::new(2, listing.nightly_rate.clone())
        .unwrap()
        .with_fee("cleaning", Money::new(1_000, "XTS").unwrap())
        .unwrap();
    let mut booking = Booking::create(CreateParams {
        id: id.into(),
        listing_id: listing.id.clone(),
        guest_id: "g1".into(),
        range,
        guests: 2,
        price,
        policy: listing.policy_snapshot(&range),
        created_at,
        allow_zero: false,
    })
    .unwrap();
    booking.state = state;
    booking.take_events();
    booking
}

#[derive(Default)]
pub(crate) struct TestUnit {
    listings: Mutex<BTreeMap<ListingId, Listing>>,
    bookings: Mutex<BTreeMap<BookingId, Booking>>,
    calendars: Mutex<BTreeMap<ListingId, AvailabilityCalendar>>,
    reviews: Mutex<Vec<Review>>,
    pub(crate) outbox: RecordingOutbox,
}

impl TestUnit {
    pub(crate) fn with_listing(listing: Listing) -> Self {
        let unit = Self::default();
        unit.listings
            .lock()
            .unwrap()
            .insert(listing.id.clone(), listing);
        unit
    }

    pub(crate) fn seed_booking(&self, mut booking: Booking) {
        booking.version = 1;
        self.bookings
            .lock()
            .unwrap()
            .insert(booking.id.clone(), booking);
    }

    pub(crate) fn seed_review(&self, review: Review) {
        self.reviews.lock().unwrap().push(review);
    }

    pub(crate) fn stored(&self, id: &str) -> Booking {
        self.bookings.lock().unwrap()[&BookingId::from(id)].clone()
    }

    pub(crate) fn booking_count(&self) -> usize {
        self.bookings.lock().unwrap().len()
    }

    pub(crate) fn calendar(&self, listing_id: &str) -> Option<AvailabilityCalendar> {
        self.calendars
            .lock()
            .unwrap()
            .get(&ListingId::from(listing_id))
            .cloned()
    }

    pub(crate) fn seed_calendar(&self, calendar: AvailabilityCalendar) {
        self.calendars
            .lock()
            .unwrap()
            .insert(calendar.listing_id.clone(), calendar);
    }
}

fn check_version(id: &str, expected: i64, actual: i64) -> Result<(), DomainError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id: id.to_owned(),
            expected,
            actual,
        })
    }
}

#[async_trait]
impl ListingRepository for TestUnit {
    async fn by_id(&self, id: &ListingId) -> Result<Listing, DomainError> {
        self.listings
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("listing", id.as_str()))
    }

    async fn list_by_host(&self, host_id: &HostId) -> Result<Vec<Listing>, DomainError> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .values()
            .filter(|listing| &listing.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn save(&self, listing: &mut Listing) -> Result<(), DomainError> {
        listing.version += 1;
        self.listings
            .lock()
            .unwrap()
            .insert(listing.id.clone(), listing.clone());
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for TestUnit {
    async fn by_id(&self, id: &BookingId) -> Result<Booking, DomainError> {
        self.bookings
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("booking", id.as_str()))
    }

    async fn save(&self, booking: &mut Booking) -> Result<(), DomainError> {
        let mut rows = self.bookings.lock().unwrap();
        let stored = rows.get(&booking.id).map_or(0, |row| row.version);
        check_version(booking.id.as_str(), booking.version, stored)?;
        booking.version += 1;
        let mut row = booking.clone();
        row.take_events();
        rows.insert(booking.id.clone(), row);
        Ok(())
    }

    async fn list_by_guest(&self, guest_id: &str) -> Result<Vec<Booking>, DomainError> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .values()
            .filter(|booking| booking.guest_id == guest_id)
            .cloned()
            .collect())
    }

    async fn list_by_listing(&self, listing_id: &ListingId) -> Result<Vec<Booking>, DomainError> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .values()
            .filter(|booking| &booking.listing_id == listing_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AvailabilityRepository for TestUnit {
    async fn by_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<AvailabilityCalendar, DomainError> {
        Ok(self
            .calendars
            .lock()
            .unwrap()
            .get(listing_id)
            .cloned()
            .unwrap_or_else(|| AvailabilityCalendar::new(listing_id.clone())))
    }

    async fn save(&self, calendar: &mut AvailabilityCalendar) -> Result<(), DomainError> {
        let mut rows = self.calendars.lock().unwrap();
        let stored = rows.get(&calendar.listing_id).map_or(0, |row| row.version);
        check_version(calendar.listing_id.as_str(), calendar.version, stored)?;
        calendar.version += 1;
        rows.insert(calendar.listing_id.clone(), calendar.clone());
        Ok(())
    }
}

#[async_trait]
impl ReviewRepository for TestUnit {
    async fn by_booking(&self, booking_id: &BookingId) -> Result<Option<Review>, DomainError> {
        Ok(self
            .reviews
            .lock()
            .unwrap()
            .iter()
            .find(|review| &review.booking_id == booking_id)
            .cloned())
    }

    async fn save(&self, review: &Review) -> Result<(), DomainError> {
        self.reviews.lock().unwrap().push(review.clone());
        Ok(())
    }
}

#[async_trait]
impl PricingPort for TestUnit {
    async fn quote(
        &self,
        listing: &Listing,
        range: &DateRange,
        guests: u32,
    ) -> Result<PriceBreakdown, DomainError> {
        ListingRatePricing.quote(listing, range, guests).await
    }
}

#[async_trait]
impl UnitOfWork for TestUnit {
    fn outbox(&self) -> &dyn Outbox {
        &self.outbox
    }

    async fn commit(&self) -> Result<(), DomainError> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

impl BookingUnitOfWork for TestUnit {
    fn listings(&self) -> &dyn ListingRepository {
        self
    }

    fn bookings(&self) -> &dyn BookingRepository {
        self
    }

    fn availability(&self) -> &dyn AvailabilityRepository {
        self
    }

    fn pricing(&self) -> &dyn PricingPort {
        self
    }

    fn reviews(&self) -> &dyn ReviewRepository {
        self
    }
}
