//! Assembly of the storage backend, the command and query pipelines, and
//! the relay workers.

use std::sync::Arc;
use std::time::Duration;

use rentme_booking::application::{register_handlers, BookingContext};
use rentme_booking::ports::BookingUnitOfWork;
use rentme_bus::bus::{CommandBus, QueryBus};
use rentme_bus::idempotency::IdempotencyStore;
use rentme_bus::middleware::{
    chain_commands, chain_queries, CommandLayer, IdempotencyLayer, LoggingLayer, OutboxFlushLayer,
    QueryLayer, QueryLoggingLayer, ReadOnlyLayer, TransactionLayer, ValidationLayer,
};
use rentme_bus::outbox::OutboxStore;
use rentme_bus::uow::UnitOfWorkFactory;
use rentme_bus::{CommandRegistry, QueryRegistry, RequestContext};
use rentme_core::clock::Clock;
use rentme_core::error::DomainError;
use rentme_relay::{Backoff, LoggingProducer, Producer, RelayConfig, RelayWorker};
use rentme_store::memory::{
    MemoryDatabase, MemoryIdempotencyStore, MemoryOutboxStore, MemoryUnitOfWorkFactory,
};
use rentme_store::postgres::{PgIdempotencyStore, PgOutboxStore, PgUnitOfWorkFactory};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::{AppConfig, StorageConfig};
use crate::error::AppError;

type Unit = dyn BookingUnitOfWork;

/// The three stores one deployment shares between its pipeline and its
/// relay workers.
#[derive(Clone)]
pub struct Backend {
    pub units: Arc<dyn UnitOfWorkFactory<Unit>>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Backend {
    /// Everything in process, over `db`.
    #[must_use]
    pub fn memory(db: &Arc<MemoryDatabase>) -> Self {
        Self {
            units: Arc::new(MemoryUnitOfWorkFactory::new(Arc::clone(db))),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            outbox: Arc::new(MemoryOutboxStore::new(Arc::clone(db))),
        }
    }

    /// Everything in `PostgreSQL`, over `pool`.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            units: Arc::new(PgUnitOfWorkFactory::new(pool.clone())),
            idempotency: Arc::new(PgIdempotencyStore::new(pool.clone())),
            outbox: Arc::new(PgOutboxStore::new(pool.clone())),
        }
    }

    /// Connects to the configured storage. `PostgreSQL` pools are migrated
    /// before use.
    ///
    /// # Errors
    ///
    /// [`AppError::Database`] or [`AppError::Migration`] for an unreachable
    /// or unmigratable database.
    pub async fn connect(storage: &StorageConfig) -> Result<Self, AppError> {
        match storage {
            StorageConfig::Memory => {
                info!("using in-memory storage");
                Ok(Self::memory(&Arc::new(MemoryDatabase::new())))
            }
            StorageConfig::Postgres {
                url,
                max_connections,
            } => {
                let pool = PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .connect(url)
                    .await?;
                rentme_store::postgres::migrate(&pool).await?;
                info!(max_connections, "connected to PostgreSQL");
                Ok(Self::postgres(&pool))
            }
        }
    }
}

/// The composed write and read paths.
#[derive(Clone)]
pub struct Pipeline {
    pub commands: Arc<dyn CommandBus<Unit>>,
    pub queries: Arc<dyn QueryBus<Unit>>,
    command_timeout: Option<Duration>,
}

impl Pipeline {
    /// A fresh context carrying the default command deadline.
    #[must_use]
    pub fn context(&self, correlation_id: impl Into<String>) -> BookingContext {
        let ctx = RequestContext::new(correlation_id);
        match self.command_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// Tunables of [`build_pipeline`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub idempotency_ttl: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            idempotency_ttl: Some(config.idempotency_ttl),
            command_timeout: Some(config.command_timeout),
        }
    }
}

/// Write layers, outermost first: logging, idempotency, validation,
/// transaction, outbox flush.
#[must_use]
pub fn command_layers(
    backend: &Backend,
    clock: &Arc<dyn Clock>,
    options: PipelineOptions,
) -> Vec<Box<dyn CommandLayer<Unit>>> {
    let mut idempotency = IdempotencyLayer::new(Arc::clone(&backend.idempotency), Arc::clone(clock));
    if let Some(ttl) = options.idempotency_ttl {
        idempotency = idempotency.with_ttl(ttl);
    }
    vec![
        Box::new(LoggingLayer),
        Box::new(idempotency),
        Box::new(ValidationLayer),
        Box::new(TransactionLayer::new(Arc::clone(&backend.units))),
        Box::new(OutboxFlushLayer),
    ]
}

/// Read layers, outermost first: logging, read-only scope.
#[must_use]
pub fn query_layers(backend: &Backend) -> Vec<Box<dyn QueryLayer<Unit>>> {
    vec![
        Box::new(QueryLoggingLayer),
        Box::new(ReadOnlyLayer::new(Arc::clone(&backend.units))),
    ]
}

/// Registers every booking handler and folds the layers around them.
///
/// # Errors
///
/// [`DomainError::DuplicateHandler`] if two handlers claim one key.
pub fn build_pipeline(
    backend: &Backend,
    clock: &Arc<dyn Clock>,
    options: PipelineOptions,
) -> Result<Pipeline, DomainError> {
    let mut commands = CommandRegistry::new();
    let mut queries = QueryRegistry::new();
    register_handlers(&mut commands, &mut queries, clock)?;
    info!(commands = ?commands.keys(), "booking handlers registered");

    Ok(Pipeline {
        commands: chain_commands(Arc::new(commands), &command_layers(backend, clock, options)),
        queries: chain_queries(Arc::new(queries), &query_layers(backend)),
        command_timeout: options.command_timeout,
    })
}

/// The producer selected by configuration: Kafka when brokers are set and
/// the `kafka` feature is built in, otherwise a logging producer.
///
/// # Errors
///
/// [`AppError::Producer`] if the Kafka client cannot be created, or
/// [`AppError::Config`] when brokers are set but Kafka support is absent.
pub fn producer(config: &AppConfig) -> Result<Arc<dyn Producer>, AppError> {
    if config.kafka_brokers.is_empty() {
        info!("no brokers configured, events go to the log");
        return Ok(Arc::new(LoggingProducer));
    }
    kafka_producer(config)
}

#[cfg(feature = "kafka")]
fn kafka_producer(config: &AppConfig) -> Result<Arc<dyn Producer>, AppError> {
    let brokers = config.kafka_brokers.join(",");
    let producer = rentme_relay::producer::KafkaProducer::new(&brokers, Duration::from_secs(5))?;
    info!(brokers = %brokers, "publishing to Kafka");
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn kafka_producer(_config: &AppConfig) -> Result<Arc<dyn Producer>, AppError> {
    Err(AppError::Config(
        "KAFKA_BROKERS is set but this build lacks the `kafka` feature".into(),
    ))
}

/// `config.workers` relay workers over one backend, with ids
/// `<worker_id>-<n>`.
#[must_use]
pub fn relay_workers(
    config: &AppConfig,
    backend: &Backend,
    producer: &Arc<dyn Producer>,
    clock: &Arc<dyn Clock>,
) -> Vec<RelayWorker> {
    (0..config.workers)
        .map(|n| {
            let relay = RelayConfig {
                worker_id: format!("{}-{n}", config.worker_id),
                poll_interval: config.poll_interval,
                topic_prefix: config.topic_prefix.clone(),
                source: config.outbox_source.clone(),
                backoff: Backoff::new(config.retry_backoff.clone()),
                max_format_attempts: config.max_format_attempts,
                claim_timeout: config.claim_timeout,
            };
            RelayWorker::new(
                Arc::clone(&backend.outbox),
                Arc::clone(producer),
                Arc::clone(clock),
                relay,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rentme_core::clock::SystemClock;

    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_lookup(|name| match name {
            "OUTBOX_WORKERS" => Some("3".into()),
            "OUTBOX_WORKER_ID" => Some("relay-a".into()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_relay_workers_get_distinct_ids() {
        // Arrange
        let backend = Backend::memory(&Arc::new(MemoryDatabase::new()));
        let producer: Arc<dyn Producer> = Arc::new(LoggingProducer);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Act
        let workers = relay_workers(&config(), &backend, &producer, &clock);

        // Assert
        let ids: Vec<&str> = workers.iter().map(|w| w.config().worker_id.as_str()).collect();
        assert_eq!(ids, vec!["relay-a-0", "relay-a-1", "relay-a-2"]);
    }

    #[test]
    fn test_command_layers_follow_reference_order() {
        let backend = Backend::memory(&Arc::new(MemoryDatabase::new()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let layers = command_layers(&backend, &clock, PipelineOptions::default());

        assert_eq!(layers.len(), 5);
    }

    #[test]
    fn test_no_brokers_selects_logging_producer() {
        assert!(producer(&config()).is_ok());
    }

    #[tokio::test]
    async fn test_pipeline_context_carries_command_deadline() {
        let backend = Backend::memory(&Arc::new(MemoryDatabase::new()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pipeline = build_pipeline(&backend, &clock, PipelineOptions::from(&config())).unwrap();

        let ctx = pipeline.context("corr-1");

        assert_eq!(ctx.correlation_id, "corr-1");
        assert!(ctx.deadline.is_some());
    }
}
