//! Per-call request context.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rentme_core::error::DomainError;
use tokio::time::Instant;
use uuid::Uuid;

use crate::uow::UnitOfWork;

/// Values that travel with one dispatch through every layer and handler.
///
/// The bound Unit-of-Work is only present between the transaction layer's
/// begin and its commit/rollback.
pub struct RequestContext<U: ?Sized> {
    /// Correlates logs and staged events with the originating request.
    pub correlation_id: String,
    /// Absolute deadline for the whole call, if any.
    pub deadline: Option<Instant>,
    /// W3C trace-propagation header supplied by the caller.
    pub traceparent: Option<String>,
    uow: Option<Arc<U>>,
}

impl<U: ?Sized> fmt::Debug for RequestContext<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("correlation_id", &self.correlation_id)
            .field("deadline", &self.deadline)
            .field("traceparent", &self.traceparent)
            .field("uow_bound", &self.uow.is_some())
            .finish()
    }
}

impl<U: ?Sized> Default for RequestContext<U> {
    fn default() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            deadline: None,
            traceparent: None,
            uow: None,
        }
    }
}

impl<U: ?Sized + UnitOfWork> RequestContext<U> {
    /// Creates a context with the given correlation id and no deadline.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Self::default()
        }
    }

    /// Sets the deadline to `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attaches a `traceparent` header value.
    #[must_use]
    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }

    /// Returns the bound Unit-of-Work.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnitOfWorkMissing`] when called outside a
    /// transaction scope.
    pub fn uow(&self) -> Result<&Arc<U>, DomainError> {
        self.uow.as_ref().ok_or(DomainError::UnitOfWorkMissing)
    }

    /// Whether a Unit-of-Work is currently bound.
    #[must_use]
    pub fn has_uow(&self) -> bool {
        self.uow.is_some()
    }

    /// Binds a Unit-of-Work, replacing any previous one.
    pub fn bind_uow(&mut self, unit: Arc<U>) {
        self.uow = Some(unit);
    }

    /// Unbinds and returns the current Unit-of-Work.
    pub fn take_uow(&mut self) -> Option<Arc<U>> {
        self.uow.take()
    }
}

/// Runs `fut` under an optional deadline.
///
/// # Errors
///
/// Returns [`DomainError::DeadlineExceeded`] if the deadline elapses first,
/// otherwise whatever `fut` returns.
pub async fn bounded<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, DomainError>
where
    F: Future<Output = Result<T, DomainError>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| DomainError::DeadlineExceeded)?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_without_deadline_returns_inner_result() {
        let result = bounded(None, async { Ok::<_, DomainError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_past_deadline_fails_with_deadline_exceeded() {
        // Arrange
        let deadline = Instant::now() + Duration::from_millis(10);

        // Act
        let result = bounded(Some(deadline), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, DomainError>(())
        })
        .await;

        // Assert
        assert_eq!(result, Err(DomainError::DeadlineExceeded));
    }
}
