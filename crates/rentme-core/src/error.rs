//! Domain error types.
//!
//! `DomainError` is the single failure type that flows through the command
//! pipeline. It is serializable so that a failed idempotent command can be
//! stored and replayed as the exact same variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level domain error type.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DomainError {
    /// An entity or aggregate was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The kind of entity that was looked up (e.g. "booking").
        kind: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: String,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A validation error in domain logic or command input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A state-machine transition that is not permitted from the current state.
    #[error("invalid state transition: cannot {action} from {state}")]
    InvalidStateTransition {
        /// The state the aggregate was in.
        state: String,
        /// The transition that was attempted.
        action: String,
    },

    /// Confirmation of a paid booking without a payment hold.
    #[error("payment hold required before confirmation")]
    PaymentHoldRequired,

    /// A currency code that is not a 3-letter code.
    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Arithmetic between two amounts in different currencies.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,
        /// Currency of the right operand.
        right: String,
    },

    /// The caller does not own the resource it tried to act on.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No handler is registered for the dispatched key.
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    /// The payload dispatched under a key does not match the handler's type.
    #[error("invalid command for handler: {0}")]
    InvalidCommand(String),

    /// The erased result could not be converted to the declared output type.
    #[error("result type mismatch: {0}")]
    ResultTypeMismatch(String),

    /// A second handler was registered under an existing key.
    #[error("handler already registered: {0}")]
    DuplicateHandler(String),

    /// A handler that needs a unit of work ran outside any transaction scope.
    #[error("unit of work missing from request context")]
    UnitOfWorkMissing,

    /// Commit or rollback was called on a unit of work that already ended.
    #[error("unit of work already closed")]
    TransactionClosed,

    /// The caller-supplied deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A stored payload could not be decoded into the declared shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A cached failure whose original variant could not be recovered.
    #[error("{0}")]
    Replayed(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Shorthand for [`DomainError::NotFound`].
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_owned(),
            id: id.into(),
        }
    }

    /// Shorthand for [`DomainError::InvalidStateTransition`].
    pub fn invalid_transition(state: impl ToString, action: &str) -> Self {
        Self::InvalidStateTransition {
            state: state.to_string(),
            action: action.to_owned(),
        }
    }

    /// Returns true when retrying the same request with fresh state may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_survives_json_round_trip_as_same_variant() {
        // Arrange
        let err = DomainError::ConcurrencyConflict {
            aggregate_id: "b1".into(),
            expected: 1,
            actual: 2,
        };

        // Act
        let encoded = serde_json::to_string(&err).unwrap();
        let decoded: DomainError = serde_json::from_str(&encoded).unwrap();

        // Assert
        assert_eq!(decoded, err);
        assert!(encoded.contains("\"code\":\"concurrency_conflict\""));
    }

    #[test]
    fn test_unit_variants_encode_with_code_tag() {
        let encoded = serde_json::to_string(&DomainError::UnitOfWorkMissing).unwrap();
        assert_eq!(encoded, r#"{"code":"unit_of_work_missing"}"#);
    }

    #[test]
    fn test_invalid_transition_message_names_state_and_action() {
        let err = DomainError::invalid_transition("CANCELLED", "check in");
        assert_eq!(
            err.to_string(),
            "invalid state transition: cannot check in from CANCELLED"
        );
    }
}
