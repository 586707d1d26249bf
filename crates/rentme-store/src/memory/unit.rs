//! Buffered in-memory Unit-of-Work.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rentme_booking::application::pricing::ListingRatePricing;
use rentme_booking::domain::aggregates::Booking;
use rentme_booking::domain::availability::AvailabilityCalendar;
use rentme_booking::domain::date_range::DateRange;
use rentme_booking::domain::ids::{BookingId, HostId, ListingId};
use rentme_booking::domain::listing::Listing;
use rentme_booking::domain::pricing::PriceBreakdown;
use rentme_booking::domain::review::Review;
use rentme_booking::ports::{
    AvailabilityRepository, BookingRepository, BookingUnitOfWork, ListingRepository,
    PricingPort, ReviewRepository,
};
use rentme_bus::outbox::{EventRecord, Outbox, OutboxEntry};
use rentme_bus::uow::{TxOptions, UnitOfWork, UnitOfWorkFactory};
use rentme_core::error::DomainError;
use tokio::time::Instant;
use tracing::debug;

use super::{MemoryDatabase, Versioned};

/// A write waiting for commit, with the version it was based on.
#[derive(Debug)]
struct Staged<T> {
    base: i64,
    row: T,
}

#[derive(Debug, Default)]
struct Pending {
    closed: bool,
    listings: BTreeMap<ListingId, Staged<Listing>>,
    bookings: BTreeMap<BookingId, Staged<Booking>>,
    calendars: BTreeMap<ListingId, Staged<AvailabilityCalendar>>,
    reviews: BTreeMap<BookingId, Review>,
    added: Vec<EventRecord>,
    flushed: Vec<EventRecord>,
}

fn conflict(aggregate_id: &str, expected: i64, actual: i64) -> DomainError {
    DomainError::ConcurrencyConflict {
        aggregate_id: aggregate_id.to_owned(),
        expected,
        actual,
    }
}

/// Stages `entity` if its version matches what this unit currently sees,
/// bumping the version on success.
fn stage<K, T>(
    staged: &mut BTreeMap<K, Staged<T>>,
    committed: Option<&T>,
    key: &K,
    entity: &mut T,
) -> Result<(), DomainError>
where
    K: Ord + Clone + ToString,
    T: Versioned,
{
    let previous = staged.get(key);
    let current = previous
        .map(|s| s.row.version())
        .or_else(|| committed.map(Versioned::version))
        .unwrap_or(0);
    if current != entity.version() {
        return Err(conflict(&key.to_string(), entity.version(), current));
    }
    let base = previous.map_or(current, |s| s.base);
    entity.set_version(current + 1);
    staged.insert(
        key.clone(),
        Staged {
            base,
            row: entity.to_row(),
        },
    );
    Ok(())
}

/// Fails unless every staged row is still based on the committed version.
fn verify<K, T>(
    staged: &BTreeMap<K, Staged<T>>,
    committed: &BTreeMap<K, T>,
) -> Result<(), DomainError>
where
    K: Ord + ToString,
    T: Versioned,
{
    for (key, write) in staged {
        let actual = committed.get(key).map_or(0, Versioned::version);
        if actual != write.base {
            return Err(conflict(&key.to_string(), write.base, actual));
        }
    }
    Ok(())
}

/// Committed rows overlaid with this unit's writes.
fn merged<K, T>(committed: &BTreeMap<K, T>, staged: &BTreeMap<K, Staged<T>>) -> Vec<T>
where
    K: Ord + Clone,
    T: Clone,
{
    let mut rows = committed.clone();
    for (key, write) in staged {
        rows.insert(key.clone(), write.row.clone());
    }
    rows.into_values().collect()
}

/// One in-memory transaction scope.
pub struct MemoryUnit {
    db: Arc<MemoryDatabase>,
    pricing: Arc<dyn PricingPort>,
    read_only: bool,
    pending: Mutex<Pending>,
}

impl MemoryUnit {
    fn new(db: Arc<MemoryDatabase>, pricing: Arc<dyn PricingPort>, options: TxOptions) -> Self {
        Self {
            db,
            pricing,
            read_only: options.read_only,
            pending: Mutex::new(Pending::default()),
        }
    }

    fn open(&self) -> Result<MutexGuard<'_, Pending>, DomainError> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.closed {
            return Err(DomainError::TransactionClosed);
        }
        Ok(pending)
    }

    fn writable(&self) -> Result<MutexGuard<'_, Pending>, DomainError> {
        if self.read_only {
            return Err(DomainError::Infrastructure(
                "write attempted in a read-only unit of work".into(),
            ));
        }
        self.open()
    }

    /// Ends the scope, handing back whatever it had staged.
    fn close(&self) -> Result<Pending, DomainError> {
        let mut pending = self.open()?;
        let taken = std::mem::take(&mut *pending);
        pending.closed = true;
        Ok(taken)
    }
}

#[async_trait]
impl Outbox for MemoryUnit {
    async fn add(&self, records: Vec<EventRecord>) -> Result<(), DomainError> {
        self.writable()?.added.extend(records);
        Ok(())
    }

    async fn flush(&self) -> Result<(), DomainError> {
        let mut pending = self.writable()?;
        let added = std::mem::take(&mut pending.added);
        pending.flushed.extend(added);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn outbox(&self) -> &dyn Outbox {
        self
    }

    async fn commit(&self) -> Result<(), DomainError> {
        let pending = self.close()?;
        let mut tables = self.db.lock();
        verify(&pending.listings, &tables.listings)?;
        verify(&pending.bookings, &tables.bookings)?;
        verify(&pending.calendars, &tables.calendars)?;

        let bookings = pending.bookings.len();
        let events = pending.flushed.len() + pending.added.len();
        for (id, write) in pending.listings {
            tables.listings.insert(id, write.row);
        }
        for (id, write) in pending.bookings {
            tables.bookings.insert(id, write.row);
        }
        for (id, write) in pending.calendars {
            tables.calendars.insert(id, write.row);
        }
        tables.reviews.extend(pending.reviews);
        tables.outbox.extend(
            pending
                .flushed
                .into_iter()
                .chain(pending.added)
                .map(OutboxEntry::new),
        );
        debug!(bookings, events, "memory unit committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DomainError> {
        let pending = self.close()?;
        debug!(
            discarded_events = pending.flushed.len() + pending.added.len(),
            "memory unit rolled back"
        );
        Ok(())
    }
}

#[async_trait]
impl ListingRepository for MemoryUnit {
    async fn by_id(&self, id: &ListingId) -> Result<Listing, DomainError> {
        let pending = self.open()?;
        if let Some(write) = pending.listings.get(id) {
            return Ok(write.row.clone());
        }
        self.db
            .lock()
            .listings
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("listing", id.as_str()))
    }

    async fn list_by_host(&self, host_id: &HostId) -> Result<Vec<Listing>, DomainError> {
        let pending = self.open()?;
        let tables = self.db.lock();
        let mut listings = merged(&tables.listings, &pending.listings);
        listings.retain(|listing| &listing.host_id == host_id);
        Ok(listings)
    }

    async fn save(&self, listing: &mut Listing) -> Result<(), DomainError> {
        let mut pending = self.writable()?;
        let tables = self.db.lock();
        let id = listing.id.clone();
        stage(&mut pending.listings, tables.listings.get(&id), &id, listing)
    }
}

#[async_trait]
impl BookingRepository for MemoryUnit {
    async fn by_id(&self, id: &BookingId) -> Result<Booking, DomainError> {
        let pending = self.open()?;
        if let Some(write) = pending.bookings.get(id) {
            return Ok(write.row.clone());
        }
        self.db
            .lock()
            .bookings
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("booking", id.as_str()))
    }

    async fn save(&self, booking: &mut Booking) -> Result<(), DomainError> {
        let mut pending = self.writable()?;
        let tables = self.db.lock();
        let id = booking.id.clone();
        stage(&mut pending.bookings, tables.bookings.get(&id), &id, booking)
    }

    async fn list_by_guest(&self, guest_id: &str) -> Result<Vec<Booking>, DomainError> {
        let pending = self.open()?;
        let tables = self.db.lock();
        let mut bookings = merged(&tables.bookings, &pending.bookings);
        bookings.retain(|booking| booking.guest_id == guest_id);
        Ok(bookings)
    }

    async fn list_by_listing(&self, listing_id: &ListingId) -> Result<Vec<Booking>, DomainError> {
        let pending = self.open()?;
        let tables = self.db.lock();
        let mut bookings = merged(&tables.bookings, &pending.bookings);
        bookings.retain(|booking| &booking.listing_id == listing_id);
        Ok(bookings)
    }
}

#[async_trait]
impl AvailabilityRepository for MemoryUnit {
    async fn by_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<AvailabilityCalendar, DomainError> {
        let pending = self.open()?;
        if let Some(write) = pending.calendars.get(listing_id) {
            return Ok(write.row.clone());
        }
        Ok(self
            .db
            .lock()
            .calendars
            .get(listing_id)
            .cloned()
            .unwrap_or_else(|| AvailabilityCalendar::new(listing_id.clone())))
    }

    async fn save(&self, calendar: &mut AvailabilityCalendar) -> Result<(), DomainError> {
        let mut pending = self.writable()?;
        let tables = self.db.lock();
        let id = calendar.listing_id.clone();
        stage(&mut pending.calendars, tables.calendars.get(&id), &id, calendar)
    }
}

#[async_trait]
impl ReviewRepository for MemoryUnit {
    async fn by_booking(&self, booking_id: &BookingId) -> Result<Option<Review>, DomainError> {
        let pending = self.open()?;
        if let Some(review) = pending.reviews.get(booking_id) {
            return Ok(Some(review.clone()));
        }
        Ok(self.db.lock().reviews.get(booking_id).cloned())
    }

    async fn save(&self, review: &Review) -> Result<(), DomainError> {
        let mut pending = self.writable()?;
        let exists = pending.reviews.contains_key(&review.booking_id)
            || self.db.lock().reviews.contains_key(&review.booking_id);
        if exists {
            return Err(DomainError::Validation(format!(
                "booking {} is already reviewed",
                review.booking_id
            )));
        }
        pending
            .reviews
            .insert(review.booking_id.clone(), review.clone());
        Ok(())
    }
}

#[async_trait]
impl PricingPort for MemoryUnit {
    async fn quote(
        &self,
        listing: &Listing,
        range: &DateRange,
        guests: u32,
    ) -> Result<PriceBreakdown, DomainError> {
        self.pricing.quote(listing, range, guests).await
    }
}

impl BookingUnitOfWork for MemoryUnit {
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

/// Begins [`MemoryUnit`]s over a shared [`MemoryDatabase`].
pub struct MemoryUnitOfWorkFactory {
    db: Arc<MemoryDatabase>,
    pricing: Arc<dyn PricingPort>,
    begun: AtomicUsize,
}

impl MemoryUnitOfWorkFactory {
    /// A factory that prices stays with [`ListingRatePricing`].
    #[must_use]
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self::with_pricing(db, Arc::new(ListingRatePricing))
    }

    #[must_use]
    pub fn with_pricing(db: Arc<MemoryDatabase>, pricing: Arc<dyn PricingPort>) -> Self {
        Self {
            db,
            pricing,
            begun: AtomicUsize::new(0),
        }
    }

    /// How many units this factory has begun.
    #[must_use]
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWorkFactory<dyn BookingUnitOfWork> for MemoryUnitOfWorkFactory {
    async fn begin(
        &self,
        options: TxOptions,
        _deadline: Option<Instant>,
    ) -> Result<Arc<dyn BookingUnitOfWork>, DomainError> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryUnit::new(
            Arc::clone(&self.db),
            Arc::clone(&self.pricing),
            options,
        )))
    }
}
