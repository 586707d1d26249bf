//! Rentme application: configuration and wiring of the command pipeline,
//! the storage backend, and the outbox relay.

pub mod config;
pub mod error;
pub mod wiring;
