//! In-memory idempotency records.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentme_bus::idempotency::{IdempotencyRecord, IdempotencyStore, SaveOutcome};
use rentme_core::error::DomainError;

/// Insert-if-absent map of records; expired records count as absent.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn save(&self, record: IdempotencyRecord) -> Result<SaveOutcome, DomainError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let live = records
            .get(&record.key)
            .filter(|existing| !existing.is_expired(record.occurred_at));
        if let Some(existing) = live {
            return Ok(SaveOutcome::Existing(existing.clone()));
        }
        records.insert(record.key.clone(), record);
        Ok(SaveOutcome::Inserted)
    }
}
