//! Staging doubles for `Outbox`.

use std::sync::Mutex;

use async_trait::async_trait;
use rentme_bus::outbox::{EventRecord, Outbox};
use rentme_core::error::DomainError;

/// Keeps added records in a buffer and moves them to `flushed` on flush.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    pending: Mutex<Vec<EventRecord>>,
    flushed: Mutex<Vec<EventRecord>>,
}

impl RecordingOutbox {
    /// Records added but not yet flushed.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn pending(&self) -> Vec<EventRecord> {
        self.pending.lock().unwrap().clone()
    }

    /// Records that survived a flush, in staging order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn flushed(&self) -> Vec<EventRecord> {
        self.flushed.lock().unwrap().clone()
    }

    /// Names of flushed records, in order.
    pub fn flushed_names(&self) -> Vec<String> {
        self.flushed().into_iter().map(|r| r.name).collect()
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn add(&self, records: Vec<EventRecord>) -> Result<(), DomainError> {
        self.pending.lock().unwrap().extend(records);
        Ok(())
    }

    async fn flush(&self) -> Result<(), DomainError> {
        let drained: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        self.flushed.lock().unwrap().extend(drained);
        Ok(())
    }
}

/// Accepts records but fails every flush.
#[derive(Debug)]
pub struct FailingOutbox {
    message: String,
}

impl FailingOutbox {
    #[must_use]
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_owned(),
        }
    }
}

#[async_trait]
impl Outbox for FailingOutbox {
    async fn add(&self, _records: Vec<EventRecord>) -> Result<(), DomainError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure(self.message.clone()))
    }
}
