//! Middleware layers and pipeline composition.
//!
//! A layer turns a "next" bus into a wrapped bus. A pipeline is an explicit
//! list of layers folded right-to-left around a base bus, so the first layer
//! in the list is the outermost: it sees the call first and the result last.

mod idempotency;
mod logging;
mod outbox_flush;
#[cfg(test)]
mod journal;
mod read_only;
mod transaction;
mod validation;

use std::sync::Arc;

use rentme_core::error::DomainError;
use tracing::warn;

pub use idempotency::{IdempotencyLayer, KeyedLocks};
pub use logging::{LoggingLayer, QueryLoggingLayer};
pub use outbox_flush::OutboxFlushLayer;
pub use read_only::ReadOnlyLayer;
pub use transaction::TransactionLayer;
pub use validation::ValidationLayer;

use crate::bus::{CommandBus, QueryBus};
use crate::uow::UnitOfWork;

/// Decorates a command bus.
pub trait CommandLayer<U: ?Sized + UnitOfWork>: Send + Sync {
    /// Wraps `next`. The wrapper must delegate to `next` at most once per
    /// call and exactly once on its success path.
    fn layer(&self, next: Arc<dyn CommandBus<U>>) -> Arc<dyn CommandBus<U>>;
}

/// Decorates a query bus.
pub trait QueryLayer<U: ?Sized + UnitOfWork>: Send + Sync {
    /// Wraps `next`.
    fn layer(&self, next: Arc<dyn QueryBus<U>>) -> Arc<dyn QueryBus<U>>;
}

/// Folds `layers` around `base`; `layers[0]` ends up outermost.
pub fn chain_commands<U: ?Sized + UnitOfWork>(
    base: Arc<dyn CommandBus<U>>,
    layers: &[Box<dyn CommandLayer<U>>],
) -> Arc<dyn CommandBus<U>> {
    layers.iter().rev().fold(base, |next, layer| layer.layer(next))
}

/// Folds `layers` around `base`; `layers[0]` ends up outermost.
pub fn chain_queries<U: ?Sized + UnitOfWork>(
    base: Arc<dyn QueryBus<U>>,
    layers: &[Box<dyn QueryLayer<U>>],
) -> Arc<dyn QueryBus<U>> {
    layers.iter().rev().fold(base, |next, layer| layer.layer(next))
}

/// Rolls `unit` back, logging instead of failing. Used on paths that are
/// already returning an error or unwinding.
async fn rollback_quietly<U: ?Sized + UnitOfWork>(unit: &U) {
    match unit.rollback().await {
        Ok(()) | Err(DomainError::TransactionClosed) => {}
        Err(err) => warn!(error = %err, "rollback failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::bus::tests::{Echo, NullUnit, echo_registry};
    use crate::bus::{CommandEnvelope, ErasedOutput, dispatch};
    use crate::context::RequestContext;

    struct Tracer {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct Traced {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        next: Arc<dyn CommandBus<NullUnit>>,
    }

    impl CommandLayer<NullUnit> for Tracer {
        fn layer(&self, next: Arc<dyn CommandBus<NullUnit>>) -> Arc<dyn CommandBus<NullUnit>> {
            Arc::new(Traced {
                name: self.name,
                log: Arc::clone(&self.log),
                next,
            })
        }
    }

    #[async_trait]
    impl CommandBus<NullUnit> for Traced {
        async fn handle(
            &self,
            ctx: &mut RequestContext<NullUnit>,
            envelope: CommandEnvelope,
        ) -> Result<Box<dyn ErasedOutput>, DomainError> {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            let result = self.next.handle(ctx, envelope).await;
            self.log.lock().unwrap().push(format!("{} after", self.name));
            result
        }
    }

    #[tokio::test]
    async fn test_first_layer_in_list_is_outermost() {
        // Arrange
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers: Vec<Box<dyn CommandLayer<NullUnit>>> = vec![
            Box::new(Tracer {
                name: "outer",
                log: Arc::clone(&log),
            }),
            Box::new(Tracer {
                name: "inner",
                log: Arc::clone(&log),
            }),
        ];
        let base: Arc<dyn CommandBus<NullUnit>> = Arc::new(echo_registry());
        let bus = chain_commands(base, &layers);
        let mut ctx = RequestContext::new("corr-1");

        // Act
        dispatch(bus.as_ref(), &mut ctx, Echo("x".into()))
            .await
            .unwrap();

        // Assert
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer before", "inner before", "inner after", "outer after"]
        );
    }
}
