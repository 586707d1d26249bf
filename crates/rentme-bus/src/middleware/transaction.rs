//! Unit-of-Work scoping for commands.

use std::ops::{Deref, DerefMut};
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use rentme_core::error::DomainError;
use tracing::debug;

use super::{CommandLayer, rollback_quietly};
use crate::bus::{CommandBus, CommandEnvelope, ErasedOutput};
use crate::context::{RequestContext, bounded};
use crate::uow::{UnitOfWork, UnitOfWorkFactory};

/// Begins a Unit-of-Work per command, binds it to the context, and commits
/// on success. Every other exit path rolls back: handler errors, commit
/// errors, an elapsed deadline, and panics (which are then resumed). A
/// context that already carries a unit is passed through untouched.
pub struct TransactionLayer<U: ?Sized + UnitOfWork> {
    factory: Arc<dyn UnitOfWorkFactory<U>>,
}

impl<U: ?Sized + UnitOfWork> TransactionLayer<U> {
    #[must_use]
    pub fn new(factory: Arc<dyn UnitOfWorkFactory<U>>) -> Self {
        Self { factory }
    }
}

struct Transactional<U: ?Sized + UnitOfWork> {
    next: Arc<dyn CommandBus<U>>,
    factory: Arc<dyn UnitOfWorkFactory<U>>,
}

impl<U: ?Sized + UnitOfWork> CommandLayer<U> for TransactionLayer<U> {
    fn layer(&self, next: Arc<dyn CommandBus<U>>) -> Arc<dyn CommandBus<U>> {
        Arc::new(Transactional {
            next,
            factory: Arc::clone(&self.factory),
        })
    }
}

/// Keeps a unit bound to the context for as long as it lives. Dropping it
/// unbinds the unit, even when the caller abandons the call mid-flight.
struct BoundUnit<'a, U: ?Sized + UnitOfWork> {
    ctx: &'a mut RequestContext<U>,
}

impl<'a, U: ?Sized + UnitOfWork> BoundUnit<'a, U> {
    fn bind(ctx: &'a mut RequestContext<U>, unit: Arc<U>) -> Self {
        ctx.bind_uow(unit);
        Self { ctx }
    }
}

impl<U: ?Sized + UnitOfWork> Deref for BoundUnit<'_, U> {
    type Target = RequestContext<U>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<U: ?Sized + UnitOfWork> DerefMut for BoundUnit<'_, U> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<U: ?Sized + UnitOfWork> Drop for BoundUnit<'_, U> {
    fn drop(&mut self) {
        self.ctx.take_uow();
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> CommandBus<U> for Transactional<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        if ctx.has_uow() {
            debug!(command = envelope.key(), "reusing bound unit of work");
            return self.next.handle(ctx, envelope).await;
        }

        let deadline = ctx.deadline;
        let unit = bounded(deadline, self.factory.begin(envelope.tx_options(), deadline)).await?;
        let mut scope = BoundUnit::bind(ctx, Arc::clone(&unit));

        let outcome = AssertUnwindSafe(bounded(deadline, self.next.handle(&mut scope, envelope)))
            .catch_unwind()
            .await;
        drop(scope);

        match outcome {
            Ok(Ok(output)) => match bounded(deadline, unit.commit()).await {
                Ok(()) => Ok(output),
                Err(err) => {
                    rollback_quietly(unit.as_ref()).await;
                    Err(err)
                }
            },
            Ok(Err(err)) => {
                rollback_quietly(unit.as_ref()).await;
                Err(err)
            }
            Err(panic) => {
                rollback_quietly(unit.as_ref()).await;
                resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::bus::dispatch;
    use crate::middleware::journal::{JournalFactory, Mode, Step, journal_pipeline};

    #[tokio::test]
    async fn test_success_commits_once_and_unbinds() {
        // Arrange
        let factory = Arc::new(JournalFactory::default());
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr");

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Succeed)).await;

        // Assert
        assert_eq!(result, Ok(1));
        assert_eq!(factory.journal(), vec!["begin", "commit"]);
        assert!(!ctx.has_uow());
    }

    #[tokio::test]
    async fn test_handler_error_rolls_back() {
        let factory = Arc::new(JournalFactory::default());
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr");

        let result = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Fail)).await;

        assert_eq!(result, Err(DomainError::Validation("nope".into())));
        assert_eq!(factory.journal(), vec!["begin", "rollback"]);
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back_and_surfaces() {
        // Arrange
        let factory = Arc::new(JournalFactory {
            fail_commit: true,
            ..JournalFactory::default()
        });
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr");

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Succeed)).await;

        // Assert
        assert_eq!(result, Err(DomainError::Infrastructure("commit refused".into())));
        assert_eq!(factory.journal(), vec!["begin", "commit", "rollback"]);
    }

    #[tokio::test]
    async fn test_panic_rolls_back_then_resumes() {
        // Arrange
        let factory = Arc::new(JournalFactory::default());
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr");

        // Act
        let caught = AssertUnwindSafe(dispatch(bus.as_ref(), &mut ctx, Step(Mode::Panic)))
            .catch_unwind()
            .await;

        // Assert
        assert!(caught.is_err());
        assert_eq!(factory.journal(), vec!["begin", "rollback"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_rolls_back() {
        // Arrange
        let factory = Arc::new(JournalFactory::default());
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr").with_timeout(Duration::from_millis(50));

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Stall)).await;

        // Assert
        assert_eq!(result, Err(DomainError::DeadlineExceeded));
        assert_eq!(factory.journal(), vec!["begin", "rollback"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_leaves_context_unbound() {
        // Arrange
        let factory = Arc::new(JournalFactory::default());
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr");

        // Act
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            dispatch(bus.as_ref(), &mut ctx, Step(Mode::Stall)),
        )
        .await;
        let unbound_after_abandon = !ctx.has_uow();
        let retried = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Succeed)).await;

        // Assert
        assert!(abandoned.is_err());
        assert!(unbound_after_abandon);
        assert_eq!(retried, Ok(1));
        assert_eq!(factory.journal(), vec!["begin", "begin", "commit"]);
    }

    #[tokio::test]
    async fn test_bound_unit_is_reused_without_nesting() {
        // Arrange
        let factory = Arc::new(JournalFactory::default());
        let bus = journal_pipeline(&factory, false);
        let mut ctx = RequestContext::new("corr");
        ctx.bind_uow(factory.unit());

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Succeed)).await;

        // Assert
        assert_eq!(result, Ok(1));
        assert!(factory.journal().is_empty());
        assert!(ctx.has_uow());
    }

    #[tokio::test]
    async fn test_flush_failure_inside_transaction_rolls_back() {
        // Arrange
        let factory = Arc::new(JournalFactory {
            fail_flush: true,
            ..JournalFactory::default()
        });
        let bus = journal_pipeline(&factory, true);
        let mut ctx = RequestContext::new("corr");

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, Step(Mode::Succeed)).await;

        // Assert
        assert_eq!(result, Err(DomainError::Infrastructure("outbox down".into())));
        assert_eq!(factory.journal(), vec!["begin", "flush", "rollback"]);
    }
}
