//! Transactional outbox contracts.
//!
//! Handlers stage [`EventRecord`]s through the [`Outbox`] of their bound
//! Unit-of-Work, so staged events commit or roll back together with the
//! business rows. The relay later drains committed records through an
//! [`OutboxStore`] using the exclusive claim protocol.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentme_core::error::DomainError;
use rentme_core::event::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::uow::UnitOfWork;

/// Header carrying the W3C trace context of the staging request.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// A storable, encoded domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    /// Dotted event name, e.g. `booking.cancelled`.
    pub name: String,
    /// JSON body of the event.
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    /// Aggregate reference; doubles as the broker partition key.
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// In-transaction event staging.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Appends records to the transaction's staging buffer.
    async fn add(&self, records: Vec<EventRecord>) -> Result<(), DomainError>;

    /// Writes every buffered record into the transaction. Fails as a whole;
    /// a partial flush is never reported as success.
    async fn flush(&self) -> Result<(), DomainError>;
}

/// Turns a domain event into a storable record.
pub trait EventEncoder: Send + Sync {
    /// Encodes one event.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Decode`] if the body cannot be serialized.
    fn encode(&self, event: &dyn DomainEvent) -> Result<EventRecord, DomainError>;
}

/// JSON body, empty headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventEncoder;

impl EventEncoder for JsonEventEncoder {
    fn encode(&self, event: &dyn DomainEvent) -> Result<EventRecord, DomainError> {
        let body = event.to_payload()?;
        let payload = serde_json::to_vec(&body).map_err(|e| DomainError::Decode(e.to_string()))?;
        let metadata = event.metadata();
        Ok(EventRecord {
            id: metadata.event_id,
            name: metadata.event_type.clone(),
            payload,
            headers: BTreeMap::new(),
            aggregate_id: metadata.aggregate_id.clone(),
            occurred_at: metadata.occurred_at,
        })
    }
}

/// Encodes `events` and stages them on the context's Unit-of-Work, copying
/// the request's `traceparent` into each record's headers.
///
/// # Errors
///
/// Returns [`DomainError::UnitOfWorkMissing`] outside a transaction scope, or
/// the first encoding or staging failure. Nothing is staged on failure.
pub async fn stage_events<E, U>(
    ctx: &RequestContext<U>,
    events: &[E],
) -> Result<usize, DomainError>
where
    E: DomainEvent,
    U: ?Sized + UnitOfWork,
{
    if events.is_empty() {
        return Ok(0);
    }
    let unit = ctx.uow()?;
    let mut records = Vec::with_capacity(events.len());
    for event in events {
        let mut record = JsonEventEncoder.encode(event)?;
        if let Some(traceparent) = &ctx.traceparent {
            record
                .headers
                .insert(TRACEPARENT_HEADER.to_owned(), traceparent.clone());
        }
        records.push(record);
    }
    let staged = records.len();
    unit.outbox().add(records).await?;
    Ok(staged)
}

/// Delivery state of a durable outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxState {
    /// Committed, never attempted.
    New,
    /// Reserved by exactly one relay worker.
    Claimed,
    /// Published. Terminal; the row is retained for audit.
    Sent,
    /// Last attempt failed; eligible again after `next_attempt_at`.
    Failed,
    /// Permanently undeliverable. Terminal.
    Dead,
}

impl OutboxState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Claimed => "CLAIMED",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        }
    }

    /// Whether a worker may claim a record in this state.
    #[must_use]
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::New | Self::Failed)
    }
}

impl fmt::Display for OutboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "CLAIMED" => Ok(Self::Claimed),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "DEAD" => Ok(Self::Dead),
            other => Err(DomainError::Decode(format!("unknown outbox state {other:?}"))),
        }
    }
}

/// A durable outbox row with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub record: EventRecord,
    pub state: OutboxState,
    /// Failed delivery attempts so far.
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// A freshly committed record, claimable immediately.
    #[must_use]
    pub fn new(record: EventRecord) -> Self {
        let next_attempt_at = record.occurred_at;
        Self {
            record,
            state: OutboxState::New,
            attempts: 0,
            next_attempt_at,
            claimed_by: None,
            claimed_at: None,
            sent_at: None,
            last_error: None,
        }
    }
}

/// Durable outbox store used by the relay.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically moves one `NEW` or `FAILED` record with
    /// `next_attempt_at <= now` to `CLAIMED` for `worker_id`. Concurrent
    /// callers never receive the same record.
    async fn claim(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, DomainError>;

    /// `CLAIMED -> SENT`.
    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DomainError>;

    /// `CLAIMED -> FAILED`, incrementing `attempts`.
    async fn mark_failed(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError>;

    /// `CLAIMED -> DEAD`, incrementing `attempts`.
    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<(), DomainError>;

    /// Returns records claimed before `claimed_before` to `FAILED`, eligible
    /// immediately. Yields the number of released records.
    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, DomainError>;
}
