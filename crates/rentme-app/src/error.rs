//! Startup errors.

use rentme_core::error::DomainError;
use rentme_relay::RelayError;
use thiserror::Error;

/// Failures that stop the process before it starts serving.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The broker producer could not be created.
    #[error("producer error: {0}")]
    Producer(#[from] RelayError),

    /// Handler registration failed.
    #[error("wiring error: {0}")]
    Wiring(#[from] DomainError),

    /// Signal handling or other I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}
