//! Relay error types.

use rentme_core::error::DomainError;
use thiserror::Error;
use uuid::Uuid;

/// Why one relay step failed.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The staged payload cannot become an envelope. Retrying will not help.
    #[error("outbox record {id} cannot be formatted: {reason}")]
    Format { id: Uuid, reason: String },

    /// The broker did not accept the message. Worth retrying.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The outbox store failed.
    #[error("outbox store: {0}")]
    Store(#[from] DomainError),
}

impl RelayError {
    /// Whether retrying the same record can never succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Format { .. })
    }
}
