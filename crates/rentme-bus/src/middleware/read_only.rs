//! Read-only Unit-of-Work scoping for queries.

use std::any::Any;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use rentme_core::error::DomainError;

use super::{QueryLayer, rollback_quietly};
use crate::bus::{QueryBus, QueryEnvelope};
use crate::context::{RequestContext, bounded};
use crate::uow::{TxOptions, UnitOfWork, UnitOfWorkFactory};

/// Runs each query in a read-only unit that is always rolled back.
pub struct ReadOnlyLayer<U: ?Sized + UnitOfWork> {
    factory: Arc<dyn UnitOfWorkFactory<U>>,
}

impl<U: ?Sized + UnitOfWork> ReadOnlyLayer<U> {
    #[must_use]
    pub fn new(factory: Arc<dyn UnitOfWorkFactory<U>>) -> Self {
        Self { factory }
    }
}

struct ReadOnly<U: ?Sized + UnitOfWork> {
    next: Arc<dyn QueryBus<U>>,
    factory: Arc<dyn UnitOfWorkFactory<U>>,
}

impl<U: ?Sized + UnitOfWork> QueryLayer<U> for ReadOnlyLayer<U> {
    fn layer(&self, next: Arc<dyn QueryBus<U>>) -> Arc<dyn QueryBus<U>> {
        Arc::new(ReadOnly {
            next,
            factory: Arc::clone(&self.factory),
        })
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> QueryBus<U> for ReadOnly<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: QueryEnvelope,
    ) -> Result<Box<dyn Any + Send>, DomainError> {
        if ctx.has_uow() {
            return self.next.handle(ctx, envelope).await;
        }

        let deadline = ctx.deadline;
        let unit = bounded(deadline, self.factory.begin(TxOptions::read_only(), deadline)).await?;
        ctx.bind_uow(Arc::clone(&unit));
        let outcome = AssertUnwindSafe(bounded(deadline, self.next.handle(ctx, envelope)))
            .catch_unwind()
            .await;
        ctx.take_uow();
        rollback_quietly(unit.as_ref()).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{QueryRegistry, ask};
    use crate::middleware::chain_queries;
    use crate::middleware::journal::{JournalFactory, JournalUnit, Peek, PeekHandler};

    #[tokio::test]
    async fn test_query_runs_in_read_only_unit_that_is_rolled_back() {
        // Arrange
        let factory = Arc::new(JournalFactory::default());
        let mut registry = QueryRegistry::<JournalUnit>::new();
        registry.register::<Peek, _>(PeekHandler).unwrap();
        let base: Arc<dyn QueryBus<JournalUnit>> = Arc::new(registry);
        let layers: Vec<Box<dyn QueryLayer<JournalUnit>>> = vec![Box::new(ReadOnlyLayer::new(
            Arc::clone(&factory) as Arc<dyn UnitOfWorkFactory<JournalUnit>>,
        ))];
        let bus = chain_queries(base, &layers);
        let mut ctx = RequestContext::new("corr");

        // Act
        let read_only = ask(bus.as_ref(), &mut ctx, Peek).await;

        // Assert
        assert_eq!(read_only, Ok(true));
        assert_eq!(factory.journal(), vec!["begin", "rollback"]);
        assert!(!ctx.has_uow());
    }
}
