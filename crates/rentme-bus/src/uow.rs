//! Unit-of-Work contracts.
//!
//! A Unit-of-Work groups every repository access of one command under a
//! single begin/commit/rollback scope. Concrete units add their own
//! repository accessors on top of [`UnitOfWork`].

use std::sync::Arc;

use async_trait::async_trait;
use rentme_core::error::DomainError;
use tokio::time::Instant;

use crate::outbox::Outbox;

/// Transaction mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Reject writes for the lifetime of the unit.
    pub read_only: bool,
}

impl TxOptions {
    /// Read-write transaction.
    #[must_use]
    pub fn read_write() -> Self {
        Self { read_only: false }
    }

    /// Read-only transaction.
    #[must_use]
    pub fn read_only() -> Self {
        Self { read_only: true }
    }
}

/// A transaction scope.
///
/// Commit and rollback each end the scope; a second call to either fails
/// with [`DomainError::TransactionClosed`]. Dropping an unfinished unit
/// discards its writes.
#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    /// Event staging bound to this transaction.
    fn outbox(&self) -> &dyn Outbox;

    /// Makes every write of the scope durable.
    async fn commit(&self) -> Result<(), DomainError>;

    /// Discards every write of the scope.
    async fn rollback(&self) -> Result<(), DomainError>;
}

/// Starts Units-of-Work.
#[async_trait]
pub trait UnitOfWorkFactory<U: ?Sized + UnitOfWork>: Send + Sync {
    /// Begins a new scope. Implementations that talk to a database apply
    /// `deadline` to the statements run inside the scope.
    async fn begin(
        &self,
        options: TxOptions,
        deadline: Option<Instant>,
    ) -> Result<Arc<U>, DomainError>;
}
