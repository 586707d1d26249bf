//! `PostgreSQL` idempotency records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentme_bus::idempotency::{IdempotencyRecord, IdempotencyStore, RecordedOutcome, SaveOutcome};
use rentme_core::error::DomainError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::db_error;

/// Records keyed by the command's idempotency key. The primary key makes
/// `save` insert-if-absent across every process sharing the database.
#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes records that expired at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DomainError> {
        let purged = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();
        Ok(purged)
    }
}

fn record_from(row: &PgRow) -> Result<IdempotencyRecord, DomainError> {
    let success: Option<Vec<u8>> = row.try_get("success_payload").map_err(db_error)?;
    let failure: Option<String> = row.try_get("failure").map_err(db_error)?;
    let outcome = match (success, failure) {
        (Some(payload), _) => RecordedOutcome::Success(payload),
        (None, Some(text)) => RecordedOutcome::Failure(text),
        (None, None) => {
            return Err(DomainError::Decode(
                "idempotency record holds neither result nor failure".into(),
            ));
        }
    };
    Ok(IdempotencyRecord {
        key: row.try_get("key").map_err(db_error)?,
        outcome,
        occurred_at: row.try_get("occurred_at").map_err(db_error)?,
        expires_at: row.try_get("expires_at").map_err(db_error)?,
    })
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT key, success_payload, failure, occurred_at, expires_at
            FROM idempotency_keys
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > $2)
            ",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(record_from).transpose()
    }

    async fn save(&self, record: IdempotencyRecord) -> Result<SaveOutcome, DomainError> {
        let (success, failure) = match &record.outcome {
            RecordedOutcome::Success(payload) => (Some(payload.as_slice()), None),
            RecordedOutcome::Failure(text) => (None, Some(text.as_str())),
        };
        // An expired holder is overwritten in place; a live one blocks the
        // write and no row comes back.
        let written = sqlx::query(
            r"
            INSERT INTO idempotency_keys (key, success_payload, failure, occurred_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE
            SET success_payload = EXCLUDED.success_payload,
                failure = EXCLUDED.failure,
                occurred_at = EXCLUDED.occurred_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at IS NOT NULL
              AND idempotency_keys.expires_at <= EXCLUDED.occurred_at
            RETURNING key
            ",
        )
        .bind(&record.key)
        .bind(success)
        .bind(failure)
        .bind(record.occurred_at)
        .bind(record.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        if written.is_some() {
            return Ok(SaveOutcome::Inserted);
        }
        let existing = self
            .get(&record.key, record.occurred_at)
            .await?
            .ok_or_else(|| {
                DomainError::Infrastructure(format!(
                    "idempotency key {} neither written nor readable",
                    record.key
                ))
            })?;
        Ok(SaveOutcome::Existing(existing))
    }
}
