//! Flushes staged events into the transaction after the handler succeeds.

use std::sync::Arc;

use async_trait::async_trait;
use rentme_core::error::DomainError;

use super::CommandLayer;
use crate::bus::{CommandBus, CommandEnvelope, ErasedOutput};
use crate::context::{RequestContext, bounded};
use crate::uow::UnitOfWork;

/// Innermost write layer. A flush failure fails the command, and since the
/// transaction layer sits outside, it also rolls back the business writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxFlushLayer;

struct Flushing<U: ?Sized + UnitOfWork> {
    next: Arc<dyn CommandBus<U>>,
}

impl<U: ?Sized + UnitOfWork> CommandLayer<U> for OutboxFlushLayer {
    fn layer(&self, next: Arc<dyn CommandBus<U>>) -> Arc<dyn CommandBus<U>> {
        Arc::new(Flushing { next })
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> CommandBus<U> for Flushing<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        let output = self.next.handle(ctx, envelope).await?;
        let unit = Arc::clone(ctx.uow()?);
        bounded(ctx.deadline, unit.outbox().flush()).await?;
        Ok(output)
    }
}
