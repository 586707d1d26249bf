//! Unit-of-Work on one `PostgreSQL` transaction.

use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

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
use rentme_bus::outbox::{EventRecord, Outbox};
use rentme_bus::uow::{TxOptions, UnitOfWork, UnitOfWorkFactory};
use rentme_core::error::DomainError;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

use super::{db_error, decode_error};

type TxSlot = Option<Transaction<'static, Postgres>>;

/// One `PostgreSQL` transaction scope. Outbox records are buffered by
/// [`Outbox::add`] and inserted on the same transaction by
/// [`Outbox::flush`] or, at the latest, by commit.
pub struct PgUnit {
    tx: Mutex<TxSlot>,
    read_only: bool,
    pricing: Arc<dyn PricingPort>,
    added: SyncMutex<Vec<EventRecord>>,
}

fn conflict(aggregate_id: &str, expected: i64, actual: i64) -> DomainError {
    DomainError::ConcurrencyConflict {
        aggregate_id: aggregate_id.to_owned(),
        expected,
        actual,
    }
}

fn document<T: DeserializeOwned>(row: &PgRow) -> Result<T, DomainError> {
    let Json(value) = row.try_get::<Json<T>, _>("document").map_err(db_error)?;
    Ok(value)
}

fn to_document<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value).map_err(decode_error)
}

/// Current stored version, 0 when the row does not exist.
async fn stored_version(
    conn: &mut PgConnection,
    sql: &str,
    id: &str,
) -> Result<i64, DomainError> {
    let version: Option<i64> = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?;
    Ok(version.unwrap_or(0))
}

async fn insert_outbox(conn: &mut PgConnection, record: &EventRecord) -> Result<(), DomainError> {
    sqlx::query(
        r"
        INSERT INTO outbox (id, name, payload, headers, aggregate_id, occurred_at, next_attempt_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        ",
    )
    .bind(record.id)
    .bind(&record.name)
    .bind(&record.payload)
    .bind(Json(&record.headers))
    .bind(&record.aggregate_id)
    .bind(record.occurred_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

impl PgUnit {
    async fn slot(&self) -> Result<MutexGuard<'_, TxSlot>, DomainError> {
        let slot = self.tx.lock().await;
        if slot.is_none() {
            return Err(DomainError::TransactionClosed);
        }
        Ok(slot)
    }

    async fn writable(&self) -> Result<MutexGuard<'_, TxSlot>, DomainError> {
        if self.read_only {
            return Err(DomainError::Infrastructure(
                "write attempted in a read-only unit of work".into(),
            ));
        }
        self.slot().await
    }

    fn take_added(&self) -> Vec<EventRecord> {
        std::mem::take(&mut *self.added.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// The open transaction behind a guard returned by `slot`/`writable`.
fn conn<'a>(slot: &'a mut MutexGuard<'_, TxSlot>) -> Result<&'a mut PgConnection, DomainError> {
    slot.as_mut()
        .map(|tx| &mut **tx)
        .ok_or(DomainError::TransactionClosed)
}

#[async_trait]
impl Outbox for PgUnit {
    async fn add(&self, records: Vec<EventRecord>) -> Result<(), DomainError> {
        if self.read_only {
            return Err(DomainError::Infrastructure(
                "write attempted in a read-only unit of work".into(),
            ));
        }
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(records);
        Ok(())
    }

    async fn flush(&self) -> Result<(), DomainError> {
        let mut slot = self.writable().await?;
        let records = self.take_added();
        let conn = conn(&mut slot)?;
        for record in &records {
            insert_outbox(conn, record).await?;
        }
        debug!(events = records.len(), "outbox flushed");
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    fn outbox(&self) -> &dyn Outbox {
        self
    }

    async fn commit(&self) -> Result<(), DomainError> {
        let mut slot = self.slot().await?;
        let records = self.take_added();
        if !records.is_empty() {
            let conn = conn(&mut slot)?;
            for record in &records {
                insert_outbox(conn, record).await?;
            }
        }
        let tx = slot.take().ok_or(DomainError::TransactionClosed)?;
        tx.commit().await.map_err(db_error)
    }

    async fn rollback(&self) -> Result<(), DomainError> {
        let mut slot = self.slot().await?;
        self.take_added();
        let tx = slot.take().ok_or(DomainError::TransactionClosed)?;
        tx.rollback().await.map_err(db_error)
    }
}

#[async_trait]
impl ListingRepository for PgUnit {
    async fn by_id(&self, id: &ListingId) -> Result<Listing, DomainError> {
        let mut slot = self.slot().await?;
        let row = sqlx::query("SELECT document, version FROM listings WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(conn(&mut slot)?)
            .await
            .map_err(db_error)?
            .ok_or_else(|| DomainError::not_found("listing", id.as_str()))?;
        let mut listing: Listing = document(&row)?;
        listing.version = row.try_get("version").map_err(db_error)?;
        Ok(listing)
    }

    async fn list_by_host(&self, host_id: &HostId) -> Result<Vec<Listing>, DomainError> {
        let mut slot = self.slot().await?;
        let rows =
            sqlx::query("SELECT document, version FROM listings WHERE host_id = $1 ORDER BY id")
                .bind(host_id.as_str())
                .fetch_all(conn(&mut slot)?)
                .await
                .map_err(db_error)?;
        rows.iter()
            .map(|row| {
                let mut listing: Listing = document(row)?;
                listing.version = row.try_get("version").map_err(db_error)?;
                Ok(listing)
            })
            .collect()
    }

    async fn save(&self, listing: &mut Listing) -> Result<(), DomainError> {
        let mut slot = self.writable().await?;
        let conn = conn(&mut slot)?;
        let body = to_document(listing)?;
        let affected = sqlx::query(
            r"
            INSERT INTO listings (id, host_id, document, version)
            VALUES ($1, $2, $3, $4 + 1)
            ON CONFLICT (id) DO UPDATE
            SET host_id = EXCLUDED.host_id, document = EXCLUDED.document, version = EXCLUDED.version
            WHERE listings.version = $4
            ",
        )
        .bind(listing.id.as_str())
        .bind(listing.host_id.as_str())
        .bind(body)
        .bind(listing.version)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            let actual = stored_version(
                conn,
                "SELECT version FROM listings WHERE id = $1",
                listing.id.as_str(),
            )
            .await?;
            return Err(conflict(listing.id.as_str(), listing.version, actual));
        }
        listing.version += 1;
        Ok(())
    }
}

fn booking_from(row: &PgRow) -> Result<Booking, DomainError> {
    let mut booking: Booking = document(row)?;
    booking.version = row.try_get("version").map_err(db_error)?;
    Ok(booking)
}

#[async_trait]
impl BookingRepository for PgUnit {
    async fn by_id(&self, id: &BookingId) -> Result<Booking, DomainError> {
        let mut slot = self.slot().await?;
        let row = sqlx::query("SELECT document, version FROM bookings WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(conn(&mut slot)?)
            .await
            .map_err(db_error)?
            .ok_or_else(|| DomainError::not_found("booking", id.as_str()))?;
        booking_from(&row)
    }

    async fn save(&self, booking: &mut Booking) -> Result<(), DomainError> {
        let mut slot = self.writable().await?;
        let conn = conn(&mut slot)?;
        let body = to_document(booking)?;
        let affected = sqlx::query(
            r"
            INSERT INTO bookings (id, listing_id, guest_id, state, created_at, document, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7 + 1)
            ON CONFLICT (id) DO UPDATE
            SET state = EXCLUDED.state, document = EXCLUDED.document, version = EXCLUDED.version
            WHERE bookings.version = $7
            ",
        )
        .bind(booking.id.as_str())
        .bind(booking.listing_id.as_str())
        .bind(&booking.guest_id)
        .bind(booking.state.as_str())
        .bind(booking.created_at)
        .bind(body)
        .bind(booking.version)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            let actual = stored_version(
                conn,
                "SELECT version FROM bookings WHERE id = $1",
                booking.id.as_str(),
            )
            .await?;
            return Err(conflict(booking.id.as_str(), booking.version, actual));
        }
        booking.version += 1;
        Ok(())
    }

    async fn list_by_guest(&self, guest_id: &str) -> Result<Vec<Booking>, DomainError> {
        let mut slot = self.slot().await?;
        let rows = sqlx::query(
            "SELECT document, version FROM bookings WHERE guest_id = $1 ORDER BY created_at DESC",
        )
        .bind(guest_id)
        .fetch_all(conn(&mut slot)?)
        .await
        .map_err(db_error)?;
        rows.iter().map(booking_from).collect()
    }

    async fn list_by_listing(&self, listing_id: &ListingId) -> Result<Vec<Booking>, DomainError> {
        let mut slot = self.slot().await?;
        let rows = sqlx::query(
            "SELECT document, version FROM bookings WHERE listing_id = $1 ORDER BY created_at DESC",
        )
        .bind(listing_id.as_str())
        .fetch_all(conn(&mut slot)?)
        .await
        .map_err(db_error)?;
        rows.iter().map(booking_from).collect()
    }
}

#[async_trait]
impl AvailabilityRepository for PgUnit {
    async fn by_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<AvailabilityCalendar, DomainError> {
        let mut slot = self.slot().await?;
        let row = sqlx::query(
            "SELECT document, version FROM availability_calendars WHERE listing_id = $1",
        )
        .bind(listing_id.as_str())
        .fetch_optional(conn(&mut slot)?)
        .await
        .map_err(db_error)?;
        let Some(row) = row else {
            return Ok(AvailabilityCalendar::new(listing_id.clone()));
        };
        let mut calendar: AvailabilityCalendar = document(&row)?;
        calendar.version = row.try_get("version").map_err(db_error)?;
        Ok(calendar)
    }

    async fn save(&self, calendar: &mut AvailabilityCalendar) -> Result<(), DomainError> {
        let mut slot = self.writable().await?;
        let conn = conn(&mut slot)?;
        let body = to_document(calendar)?;
        let affected = sqlx::query(
            r"
            INSERT INTO availability_calendars (listing_id, document, version)
            VALUES ($1, $2, $3 + 1)
            ON CONFLICT (listing_id) DO UPDATE
            SET document = EXCLUDED.document, version = EXCLUDED.version
            WHERE availability_calendars.version = $3
            ",
        )
        .bind(calendar.listing_id.as_str())
        .bind(body)
        .bind(calendar.version)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            let actual = stored_version(
                conn,
                "SELECT version FROM availability_calendars WHERE listing_id = $1",
                calendar.listing_id.as_str(),
            )
            .await?;
            return Err(conflict(
                calendar.listing_id.as_str(),
                calendar.version,
                actual,
            ));
        }
        calendar.version += 1;
        Ok(())
    }
}

#[async_trait]
impl ReviewRepository for PgUnit {
    async fn by_booking(&self, booking_id: &BookingId) -> Result<Option<Review>, DomainError> {
        let mut slot = self.slot().await?;
        let row = sqlx::query("SELECT document FROM reviews WHERE booking_id = $1")
            .bind(booking_id.as_str())
            .fetch_optional(conn(&mut slot)?)
            .await
            .map_err(db_error)?;
        row.as_ref().map(document).transpose()
    }

    async fn save(&self, review: &Review) -> Result<(), DomainError> {
        let mut slot = self.writable().await?;
        let affected = sqlx::query(
            "INSERT INTO reviews (booking_id, document) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(review.booking_id.as_str())
        .bind(to_document(review)?)
        .execute(conn(&mut slot)?)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            return Err(DomainError::Validation(format!(
                "booking {} is already reviewed",
                review.booking_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PricingPort for PgUnit {
    async fn quote(
        &self,
        listing: &Listing,
        range: &DateRange,
        guests: u32,
    ) -> Result<PriceBreakdown, DomainError> {
        self.pricing.quote(listing, range, guests).await
    }
}

impl BookingUnitOfWork for PgUnit {
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

/// Begins [`PgUnit`]s on a connection pool.
#[derive(Clone)]
pub struct PgUnitOfWorkFactory {
    pool: PgPool,
    pricing: Arc<dyn PricingPort>,
}

impl PgUnitOfWorkFactory {
    /// A factory that prices stays with [`ListingRatePricing`].
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_pricing(pool, Arc::new(ListingRatePricing))
    }

    #[must_use]
    pub fn with_pricing(pool: PgPool, pricing: Arc<dyn PricingPort>) -> Self {
        Self { pool, pricing }
    }
}

#[async_trait]
impl UnitOfWorkFactory<dyn BookingUnitOfWork> for PgUnitOfWorkFactory {
    async fn begin(
        &self,
        options: TxOptions,
        deadline: Option<Instant>,
    ) -> Result<Arc<dyn BookingUnitOfWork>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if options.read_only {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now()).as_millis();
            if remaining == 0 {
                return Err(DomainError::DeadlineExceeded);
            }
            // SET does not take bind parameters; the value is an integer.
            sqlx::query(&format!("SET LOCAL statement_timeout = {remaining}"))
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        Ok(Arc::new(PgUnit {
            tx: Mutex::new(Some(tx)),
            read_only: options.read_only,
            pricing: Arc::clone(&self.pricing),
            added: SyncMutex::new(Vec::new()),
        }))
    }
}
