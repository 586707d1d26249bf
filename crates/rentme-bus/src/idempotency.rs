//! Idempotency record contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentme_core::error::DomainError;
use serde::{Deserialize, Serialize};

/// What the first execution under a key produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedOutcome {
    /// JSON-encoded handler result.
    Success(Vec<u8>),
    /// JSON-encoded [`DomainError`].
    Failure(String),
}

impl RecordedOutcome {
    /// Captures a failure so that it replays as the same variant.
    #[must_use]
    pub fn failure(error: &DomainError) -> Self {
        Self::Failure(serde_json::to_string(error).unwrap_or_else(|_| error.to_string()))
    }

    /// The cached failure, if this outcome is one.
    ///
    /// Text that is not an encoded [`DomainError`] replays as
    /// [`DomainError::Replayed`].
    #[must_use]
    pub fn error(&self) -> Option<DomainError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(text) => Some(decode_failure(text)),
        }
    }
}

/// Decodes cached failure text back into a [`DomainError`].
#[must_use]
pub fn decode_failure(text: &str) -> DomainError {
    serde_json::from_str(text).unwrap_or_else(|_| DomainError::Replayed(text.to_owned()))
}

/// Cached outcome of one idempotent command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub outcome: RecordedOutcome,
    pub occurred_at: DateTime<Utc>,
    /// After this instant the key may be executed again.
    pub expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Result of an insert-if-absent save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written.
    Inserted,
    /// A live record already held the key; it is returned unchanged.
    Existing(IdempotencyRecord),
}

/// Shared store of idempotency records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Looks up a live (unexpired at `now`) record.
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DomainError>;

    /// Inserts `record` unless a live record already holds its key. An
    /// expired record is overwritten.
    async fn save(&self, record: IdempotencyRecord) -> Result<SaveOutcome, DomainError>;
}
