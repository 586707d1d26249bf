//! Command and query contracts.

use std::fmt;

use rentme_core::error::DomainError;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::uow::TxOptions;

/// A key-addressed write intent.
///
/// `KEY` must be unique per command shape. `Output` doubles as the shape a
/// cached idempotent result is decoded into on replay, so it must round-trip
/// through JSON.
pub trait Command: Send + Sync + 'static {
    /// Stable routing key, e.g. `booking.request`.
    const KEY: &'static str;

    /// The handler's result type.
    type Output: Serialize + DeserializeOwned + Send + Sync + fmt::Debug + 'static;

    /// Caller-supplied deduplication token. `None` or empty disables
    /// idempotency for this call.
    fn idempotency_key(&self) -> Option<&str> {
        None
    }

    /// Transaction mode requested for this command.
    fn tx_options(&self) -> TxOptions {
        TxOptions::default()
    }

    /// Input validation run before any transaction is opened.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] describing the first bad field.
    fn validate(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// A key-addressed read intent.
pub trait Query: Send + 'static {
    /// Stable routing key, e.g. `booking.get`.
    const KEY: &'static str;

    /// The handler's result type.
    type Output: Send + 'static;
}
