//! In-memory durable outbox.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentme_bus::outbox::{OutboxEntry, OutboxState, OutboxStore};
use rentme_core::error::DomainError;
use uuid::Uuid;

use super::{MemoryDatabase, Tables};

/// Outbox rows committed by [`super::MemoryUnit`]s. Claims are decided under
/// the database lock, so two workers never receive the same row.
#[derive(Debug, Clone)]
pub struct MemoryOutboxStore {
    db: Arc<MemoryDatabase>,
}

impl MemoryOutboxStore {
    #[must_use]
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

fn claimed<'a>(
    tables: &'a mut Tables,
    id: Uuid,
    action: &str,
) -> Result<&'a mut OutboxEntry, DomainError> {
    let entry = tables
        .outbox
        .iter_mut()
        .find(|entry| entry.record.id == id)
        .ok_or_else(|| DomainError::not_found("outbox record", id.to_string()))?;
    if entry.state != OutboxState::Claimed {
        return Err(DomainError::invalid_transition(entry.state, action));
    }
    Ok(entry)
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn claim(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, DomainError> {
        let mut tables = self.db.lock();
        let Some(entry) = tables
            .outbox
            .iter_mut()
            .filter(|entry| entry.state.is_claimable() && entry.next_attempt_at <= now)
            .min_by_key(|entry| entry.next_attempt_at)
        else {
            return Ok(None);
        };
        entry.state = OutboxState::Claimed;
        entry.claimed_by = Some(worker_id.to_owned());
        entry.claimed_at = Some(now);
        Ok(Some(entry.clone()))
    }

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        let mut tables = self.db.lock();
        let entry = claimed(&mut tables, id, "mark sent")?;
        entry.state = OutboxState::Sent;
        entry.sent_at = Some(now);
        entry.last_error = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError> {
        let mut tables = self.db.lock();
        let entry = claimed(&mut tables, id, "mark failed")?;
        entry.state = OutboxState::Failed;
        entry.attempts += 1;
        entry.next_attempt_at = next_attempt_at;
        entry.last_error = Some(error.to_owned());
        entry.claimed_by = None;
        entry.claimed_at = None;
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<(), DomainError> {
        let mut tables = self.db.lock();
        let entry = claimed(&mut tables, id, "mark dead")?;
        entry.state = OutboxState::Dead;
        entry.attempts += 1;
        entry.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        let mut tables = self.db.lock();
        let mut released = 0;
        for entry in &mut tables.outbox {
            let Some(claimed_at) = entry.claimed_at else {
                continue;
            };
            if entry.state == OutboxState::Claimed && claimed_at < claimed_before {
                entry.state = OutboxState::Failed;
                entry.next_attempt_at = claimed_at;
                entry.last_error = Some(format!(
                    "claim by {} expired",
                    entry.claimed_by.as_deref().unwrap_or("unknown worker")
                ));
                entry.claimed_by = None;
                entry.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }
}
