//! Structured logging around each dispatch.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rentme_core::error::DomainError;
use tracing::{Instrument, info, info_span, warn};

use super::{CommandLayer, QueryLayer};
use crate::bus::{CommandBus, CommandEnvelope, ErasedOutput, QueryBus, QueryEnvelope};
use crate::context::RequestContext;
use crate::uow::UnitOfWork;

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Opens a span per command and logs its outcome and latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer;

struct LoggedCommands<U: ?Sized + UnitOfWork> {
    next: Arc<dyn CommandBus<U>>,
}

impl<U: ?Sized + UnitOfWork> CommandLayer<U> for LoggingLayer {
    fn layer(&self, next: Arc<dyn CommandBus<U>>) -> Arc<dyn CommandBus<U>> {
        Arc::new(LoggedCommands { next })
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> CommandBus<U> for LoggedCommands<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        let command = envelope.key();
        let span = info_span!(
            "command",
            command,
            correlation_id = %ctx.correlation_id,
            idempotency_key = envelope.idempotency_key().unwrap_or_default(),
        );
        let started = Instant::now();
        let result = self.next.handle(ctx, envelope).instrument(span.clone()).await;
        let elapsed_ms = elapsed_ms(started);
        span.in_scope(|| match &result {
            Ok(_) => info!(elapsed_ms, "command completed"),
            Err(err) => warn!(elapsed_ms, error = %err, "command failed"),
        });
        result
    }
}

/// Query counterpart of [`LoggingLayer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryLoggingLayer;

struct LoggedQueries<U: ?Sized + UnitOfWork> {
    next: Arc<dyn QueryBus<U>>,
}

impl<U: ?Sized + UnitOfWork> QueryLayer<U> for QueryLoggingLayer {
    fn layer(&self, next: Arc<dyn QueryBus<U>>) -> Arc<dyn QueryBus<U>> {
        Arc::new(LoggedQueries { next })
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> QueryBus<U> for LoggedQueries<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: QueryEnvelope,
    ) -> Result<Box<dyn Any + Send>, DomainError> {
        let span = info_span!(
            "query",
            query = envelope.key(),
            correlation_id = %ctx.correlation_id,
        );
        let started = Instant::now();
        let result = self.next.handle(ctx, envelope).instrument(span.clone()).await;
        let elapsed_ms = elapsed_ms(started);
        span.in_scope(|| match &result {
            Ok(_) => info!(elapsed_ms, "query completed"),
            Err(err) => warn!(elapsed_ms, error = %err, "query failed"),
        });
        result
    }
}
