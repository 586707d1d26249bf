//! In-process storage.
//!
//! A [`MemoryDatabase`] holds the committed state. Units of work read
//! through to it and keep their own writes aside until commit, which
//! re-checks every optimistic version and then applies all writes, outbox
//! records included, under one lock.

mod idempotency_store;
mod outbox_store;
mod unit;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rentme_booking::domain::aggregates::Booking;
use rentme_booking::domain::availability::AvailabilityCalendar;
use rentme_booking::domain::ids::{BookingId, ListingId};
use rentme_booking::domain::listing::Listing;
use rentme_booking::domain::review::Review;
use rentme_bus::outbox::OutboxEntry;

pub use idempotency_store::MemoryIdempotencyStore;
pub use outbox_store::MemoryOutboxStore;
pub use unit::{MemoryUnit, MemoryUnitOfWorkFactory};

/// Committed rows.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) listings: BTreeMap<ListingId, Listing>,
    pub(crate) bookings: BTreeMap<BookingId, Booking>,
    pub(crate) calendars: BTreeMap<ListingId, AvailabilityCalendar>,
    pub(crate) reviews: BTreeMap<BookingId, Review>,
    /// In commit order.
    pub(crate) outbox: Vec<OutboxEntry>,
}

/// Shared committed state of the in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every critical section leaves the tables consistent, so a poisoned
    /// lock is still safe to use.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a listing outside any unit of work.
    pub fn seed_listing(&self, listing: Listing) {
        self.lock().listings.insert(listing.id.clone(), listing);
    }

    /// The committed listing, if any.
    #[must_use]
    pub fn listing(&self, id: &ListingId) -> Option<Listing> {
        self.lock().listings.get(id).cloned()
    }

    /// The committed booking, if any.
    #[must_use]
    pub fn booking(&self, id: &BookingId) -> Option<Booking> {
        self.lock().bookings.get(id).cloned()
    }

    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.lock().bookings.len()
    }

    /// The committed calendar of a listing, if one was ever saved.
    #[must_use]
    pub fn calendar(&self, listing_id: &ListingId) -> Option<AvailabilityCalendar> {
        self.lock().calendars.get(listing_id).cloned()
    }

    /// Every committed outbox row, in commit order.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.lock().outbox.clone()
    }
}

/// Entities saved with an optimistic version.
pub(crate) trait Versioned: Clone {
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);

    /// The copy kept in a table.
    fn to_row(&self) -> Self {
        self.clone()
    }
}

impl Versioned for Booking {
    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Pending events leave through the outbox, never through the row.
    fn to_row(&self) -> Self {
        let mut row = self.clone();
        row.take_events();
        row
    }
}

impl Versioned for Listing {
    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl Versioned for AvailabilityCalendar {
    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}
