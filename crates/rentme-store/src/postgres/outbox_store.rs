//! `PostgreSQL` durable outbox.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentme_bus::outbox::{EventRecord, OutboxEntry, OutboxStore};
use rentme_core::error::DomainError;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::db_error;

const COLUMNS: &str = "id, name, payload, headers, aggregate_id, occurred_at, state, attempts, \
                       next_attempt_at, claimed_by, claimed_at, sent_at, last_error";

/// Outbox rows written by [`super::PgUnit`]. Claims use
/// `FOR UPDATE SKIP LOCKED`, so concurrent relay workers never share a row.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every row, oldest first. Used by operators and tests.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub async fn entries(&self) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox ORDER BY occurred_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(entry_from).collect()
    }

    /// Distinguishes "no such row" from "not claimed" after an update
    /// matched nothing.
    async fn transition_error(&self, id: Uuid, action: &str) -> DomainError {
        let state: Result<Option<String>, _> =
            sqlx::query_scalar("SELECT state FROM outbox WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;
        match state {
            Ok(Some(state)) => DomainError::invalid_transition(state, action),
            Ok(None) => DomainError::not_found("outbox record", id.to_string()),
            Err(error) => db_error(error),
        }
    }
}

fn entry_from(row: &PgRow) -> Result<OutboxEntry, DomainError> {
    let Json(headers) = row
        .try_get::<Json<BTreeMap<String, String>>, _>("headers")
        .map_err(db_error)?;
    let state: String = row.try_get("state").map_err(db_error)?;
    Ok(OutboxEntry {
        record: EventRecord {
            id: row.try_get("id").map_err(db_error)?,
            name: row.try_get("name").map_err(db_error)?,
            payload: row.try_get("payload").map_err(db_error)?,
            headers,
            aggregate_id: row.try_get("aggregate_id").map_err(db_error)?,
            occurred_at: row.try_get("occurred_at").map_err(db_error)?,
        },
        state: state.parse()?,
        attempts: row.try_get("attempts").map_err(db_error)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(db_error)?,
        claimed_by: row.try_get("claimed_by").map_err(db_error)?,
        claimed_at: row.try_get("claimed_at").map_err(db_error)?,
        sent_at: row.try_get("sent_at").map_err(db_error)?,
        last_error: row.try_get("last_error").map_err(db_error)?,
    })
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, DomainError> {
        let row = sqlx::query(&format!(
            r"
            UPDATE outbox
            SET state = 'CLAIMED', claimed_by = $1, claimed_at = $2
            WHERE id = (
                SELECT id FROM outbox
                WHERE state IN ('NEW', 'FAILED') AND next_attempt_at <= $2
                ORDER BY next_attempt_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {COLUMNS}
            "
        ))
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        let entry = row.as_ref().map(entry_from).transpose()?;
        if let Some(entry) = &entry {
            debug!(id = %entry.record.id, worker_id, "outbox record claimed");
        }
        Ok(entry)
    }

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        let affected = sqlx::query(
            r"
            UPDATE outbox SET state = 'SENT', sent_at = $2, last_error = NULL
            WHERE id = $1 AND state = 'CLAIMED'
            ",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            return Err(self.transition_error(id, "mark sent").await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError> {
        let affected = sqlx::query(
            r"
            UPDATE outbox
            SET state = 'FAILED', attempts = attempts + 1, next_attempt_at = $2,
                last_error = $3, claimed_by = NULL, claimed_at = NULL
            WHERE id = $1 AND state = 'CLAIMED'
            ",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            return Err(self.transition_error(id, "mark failed").await);
        }
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<(), DomainError> {
        let affected = sqlx::query(
            r"
            UPDATE outbox SET state = 'DEAD', attempts = attempts + 1, last_error = $2
            WHERE id = $1 AND state = 'CLAIMED'
            ",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected();
        if affected == 0 {
            return Err(self.transition_error(id, "mark dead").await);
        }
        Ok(())
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        let released = sqlx::query(
            r"
            UPDATE outbox
            SET state = 'FAILED', next_attempt_at = claimed_at,
                last_error = 'claim by ' || COALESCE(claimed_by, 'unknown worker') || ' expired',
                claimed_by = NULL, claimed_at = NULL
            WHERE state = 'CLAIMED' AND claimed_at < $1
            ",
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected();
        if released > 0 {
            warn!(released, "released stale outbox claims");
        }
        Ok(released)
    }
}
