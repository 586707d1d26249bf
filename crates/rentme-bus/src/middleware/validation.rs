//! Input validation before any transaction is opened.

use std::sync::Arc;

use async_trait::async_trait;
use rentme_core::error::DomainError;

use super::CommandLayer;
use crate::bus::{CommandBus, CommandEnvelope, ErasedOutput};
use crate::context::RequestContext;
use crate::uow::UnitOfWork;

/// Rejects commands whose `validate` fails without delegating.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationLayer;

struct Validated<U: ?Sized + UnitOfWork> {
    next: Arc<dyn CommandBus<U>>,
}

impl<U: ?Sized + UnitOfWork> CommandLayer<U> for ValidationLayer {
    fn layer(&self, next: Arc<dyn CommandBus<U>>) -> Arc<dyn CommandBus<U>> {
        Arc::new(Validated { next })
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> CommandBus<U> for Validated<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        envelope.validate()?;
        self.next.handle(ctx, envelope).await
    }
}
