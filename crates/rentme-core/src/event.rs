//! Domain event abstractions.
//!
//! Aggregates record events into an [`EventLedger`] as they transition. The
//! application layer drains the ledger after a successful save and stages the
//! drained events in the transactional outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier (UUID v7, time ordered).
    pub event_id: Uuid,
    /// Dotted event name, e.g. `booking.requested`.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Timestamp of the state change.
    pub occurred_at: DateTime<Utc>,
}

impl EventMetadata {
    /// Builds metadata with a fresh time-ordered event id.
    pub fn new(event_type: &str, aggregate_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_owned(),
            aggregate_id: aggregate_id.into(),
            occurred_at,
        }
    }
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the dotted event name.
    fn event_type(&self) -> &str {
        &self.metadata().event_type
    }

    /// Serializes the event body to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Decode`] if the body cannot be encoded.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;
}

/// Per-aggregate list of events recorded since the last drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLedger<E> {
    pending: Vec<E>,
}

impl<E> Default for EventLedger<E> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<E> EventLedger<E> {
    /// Appends an event in emission order.
    pub fn record(&mut self, event: E) {
        self.pending.push(event);
    }

    /// Events recorded and not yet drained.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.pending
    }

    /// Takes every pending event, leaving the ledger empty.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_events_in_order_and_empties_ledger() {
        // Arrange
        let mut ledger = EventLedger::default();
        ledger.record("first");
        ledger.record("second");

        // Act
        let drained = ledger.drain();

        // Assert
        assert_eq!(drained, vec!["first", "second"]);
        assert!(ledger.pending().is_empty());
        assert!(ledger.drain().is_empty());
    }

    #[test]
    fn test_metadata_new_assigns_distinct_ids() {
        let now = Utc::now();
        let a = EventMetadata::new("booking.requested", "b1", now);
        let b = EventMetadata::new("booking.requested", "b1", now);
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.aggregate_id, "b1");
    }
}
