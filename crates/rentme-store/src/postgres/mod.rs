//! `PostgreSQL` storage.

mod idempotency_store;
mod outbox_store;
mod unit;

use rentme_core::error::DomainError;
use sqlx::migrate::Migrator;
use sqlx::PgPool;

pub use idempotency_store::PgIdempotencyStore;
pub use outbox_store::PgOutboxStore;
pub use unit::{PgUnit, PgUnitOfWorkFactory};

/// The workspace's SQL migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies pending migrations.
///
/// # Errors
///
/// Returns the migrator's error if a migration fails or was modified after
/// being applied.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// SQLSTATE raised when `statement_timeout` cancels a statement.
const QUERY_CANCELED: &str = "57014";

/// Maps a driver error into the pipeline's error type.
pub(crate) fn db_error(error: sqlx::Error) -> DomainError {
    let cancelled = error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == QUERY_CANCELED);
    if cancelled {
        DomainError::DeadlineExceeded
    } else {
        DomainError::Infrastructure(error.to_string())
    }
}

pub(crate) fn decode_error(error: serde_json::Error) -> DomainError {
    DomainError::Decode(error.to_string())
}
