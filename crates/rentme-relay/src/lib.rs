//! Rentme Relay: at-least-once delivery of staged outbox records.
//!
//! A [`RelayWorker`] ticks on a fixed interval. Each tick claims at most one
//! record from an [`rentme_bus::outbox::OutboxStore`], wraps its payload in a
//! CloudEvents [`Envelope`], and hands it to a [`Producer`]. Publish failures
//! are rescheduled on the [`Backoff`] schedule; records whose payload cannot
//! be formatted become `DEAD` after a bounded number of attempts.
//!
//! Several workers may share one store; the store's claim is the only
//! coordination between them.

pub mod backoff;
pub mod envelope;
pub mod error;
pub mod producer;
pub mod worker;

pub use backoff::Backoff;
pub use envelope::{topic_for, Envelope};
pub use error::RelayError;
pub use producer::{LoggingProducer, MemoryProducer, Producer, PublishedMessage};
pub use worker::{RelayConfig, RelayWorker, TickOutcome};
