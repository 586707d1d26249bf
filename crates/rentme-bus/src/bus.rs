//! Key-addressed command and query registries.
//!
//! Handlers are registered against their operation's `KEY` and stored behind
//! a small typed adapter, so the payload is checked with a safe `Any`
//! downcast at call time. A payload of the wrong type fails with
//! [`DomainError::InvalidCommand`]; it is never handed to the wrong handler.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rentme_core::error::DomainError;
use serde::Serialize;

use crate::command::{Command, Query};
use crate::context::RequestContext;
use crate::uow::{TxOptions, UnitOfWork};

/// A handler result with its concrete type erased.
///
/// Keeps enough capability to be cached by the idempotency layer.
pub trait ErasedOutput: Send + Sync + fmt::Debug {
    /// JSON-encodes the result.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Decode`] if serialization fails.
    fn encode(&self) -> Result<Vec<u8>, DomainError>;

    /// Recovers the value for a downcast.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> ErasedOutput for T
where
    T: Serialize + Send + Sync + fmt::Debug + 'static,
{
    fn encode(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self).map_err(|e| DomainError::Decode(e.to_string()))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Decodes a cached payload into the dispatching command's declared output.
pub type OutputDecoder = fn(&[u8]) -> Result<Box<dyn ErasedOutput>, DomainError>;

fn decode_output<C: Command>(bytes: &[u8]) -> Result<Box<dyn ErasedOutput>, DomainError> {
    let value: C::Output = serde_json::from_slice(bytes)
        .map_err(|e| DomainError::Decode(format!("{}: {e}", C::KEY)))?;
    Ok(Box::new(value))
}

trait AnyCommand: Send + Sync {
    fn validate(&self) -> Result<(), DomainError>;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<C: Command> AnyCommand for C {
    fn validate(&self) -> Result<(), DomainError> {
        Command::validate(self)
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A command in flight through the pipeline, type-erased.
pub struct CommandEnvelope {
    key: &'static str,
    idempotency_key: Option<String>,
    tx_options: TxOptions,
    payload: Box<dyn AnyCommand>,
    decoder: OutputDecoder,
}

impl CommandEnvelope {
    /// Wraps a typed command. An empty idempotency key is treated as absent.
    pub fn new<C: Command>(command: C) -> Self {
        let idempotency_key = command
            .idempotency_key()
            .filter(|key| !key.is_empty())
            .map(str::to_owned);
        Self {
            key: C::KEY,
            idempotency_key,
            tx_options: command.tx_options(),
            payload: Box::new(command),
            decoder: decode_output::<C>,
        }
    }

    #[must_use]
    pub fn key(&self) -> &'static str {
        self.key
    }

    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    #[must_use]
    pub fn tx_options(&self) -> TxOptions {
        self.tx_options
    }

    /// Runs the command's own input validation.
    ///
    /// # Errors
    ///
    /// Whatever the command's `validate` reports.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.payload.validate()
    }

    /// The decoder for this command's output shape.
    #[must_use]
    pub fn decoder(&self) -> OutputDecoder {
        self.decoder
    }

    fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload.into_any()
    }
}

impl fmt::Debug for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEnvelope")
            .field("key", &self.key)
            .field("idempotency_key", &self.idempotency_key)
            .field("tx_options", &self.tx_options)
            .finish_non_exhaustive()
    }
}

/// A query in flight through the pipeline, type-erased.
pub struct QueryEnvelope {
    key: &'static str,
    payload: Box<dyn Any + Send>,
}

impl QueryEnvelope {
    /// Wraps a typed query.
    pub fn new<Q: Query>(query: Q) -> Self {
        Self {
            key: Q::KEY,
            payload: Box::new(query),
        }
    }

    #[must_use]
    pub fn key(&self) -> &'static str {
        self.key
    }
}

impl fmt::Debug for QueryEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEnvelope")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// The one capability shared by the registry and every middleware layer.
#[async_trait]
pub trait CommandBus<U: ?Sized + UnitOfWork>: Send + Sync {
    /// Routes one command and returns its erased result.
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError>;
}

/// Read-side counterpart of [`CommandBus`].
#[async_trait]
pub trait QueryBus<U: ?Sized + UnitOfWork>: Send + Sync {
    /// Routes one query and returns its erased result.
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: QueryEnvelope,
    ) -> Result<Box<dyn Any + Send>, DomainError>;
}

/// A strongly typed command handler.
#[async_trait]
pub trait CommandHandler<C: Command, U: ?Sized + UnitOfWork>: Send + Sync {
    /// Executes the command.
    async fn handle(&self, ctx: &mut RequestContext<U>, command: C)
    -> Result<C::Output, DomainError>;
}

/// A strongly typed query handler.
#[async_trait]
pub trait QueryHandler<Q: Query, U: ?Sized + UnitOfWork>: Send + Sync {
    /// Executes the query.
    async fn handle(&self, ctx: &mut RequestContext<U>, query: Q) -> Result<Q::Output, DomainError>;
}

#[async_trait]
trait ErasedCommandHandler<U: ?Sized + UnitOfWork>: Send + Sync {
    async fn call(
        &self,
        ctx: &mut RequestContext<U>,
        payload: Box<dyn Any + Send>,
    ) -> Result<Box<dyn ErasedOutput>, DomainError>;
}

struct TypedCommand<C, H> {
    handler: H,
    _command: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C, H, U> ErasedCommandHandler<U> for TypedCommand<C, H>
where
    C: Command,
    H: CommandHandler<C, U>,
    U: ?Sized + UnitOfWork,
{
    async fn call(
        &self,
        ctx: &mut RequestContext<U>,
        payload: Box<dyn Any + Send>,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        let command = payload.downcast::<C>().map_err(|_| {
            DomainError::InvalidCommand(format!("{} expects {}", C::KEY, type_name::<C>()))
        })?;
        let output = self.handler.handle(ctx, *command).await?;
        Ok(Box::new(output))
    }
}

#[async_trait]
trait ErasedQueryHandler<U: ?Sized + UnitOfWork>: Send + Sync {
    async fn call(
        &self,
        ctx: &mut RequestContext<U>,
        payload: Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, DomainError>;
}

struct TypedQuery<Q, H> {
    handler: H,
    _query: PhantomData<fn() -> Q>,
}

#[async_trait]
impl<Q, H, U> ErasedQueryHandler<U> for TypedQuery<Q, H>
where
    Q: Query,
    H: QueryHandler<Q, U>,
    U: ?Sized + UnitOfWork,
{
    async fn call(
        &self,
        ctx: &mut RequestContext<U>,
        payload: Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, DomainError> {
        let query = payload.downcast::<Q>().map_err(|_| {
            DomainError::InvalidCommand(format!("{} expects {}", Q::KEY, type_name::<Q>()))
        })?;
        let output = self.handler.handle(ctx, *query).await?;
        Ok(Box::new(output))
    }
}

/// Routing table from command key to handler. The innermost bus of every
/// command pipeline.
pub struct CommandRegistry<U: ?Sized + UnitOfWork> {
    handlers: HashMap<&'static str, Arc<dyn ErasedCommandHandler<U>>>,
}

impl<U: ?Sized + UnitOfWork> Default for CommandRegistry<U> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<U: ?Sized + UnitOfWork> CommandRegistry<U> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `C::KEY` to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::DuplicateHandler`] if the key is taken.
    pub fn register<C, H>(&mut self, handler: H) -> Result<(), DomainError>
    where
        C: Command,
        H: CommandHandler<C, U> + 'static,
    {
        if self.handlers.contains_key(C::KEY) {
            return Err(DomainError::DuplicateHandler(C::KEY.to_owned()));
        }
        self.handlers.insert(
            C::KEY,
            Arc::new(TypedCommand::<C, H> {
                handler,
                _command: PhantomData,
            }),
        );
        Ok(())
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.handlers.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> CommandBus<U> for CommandRegistry<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        let handler = self
            .handlers
            .get(envelope.key())
            .ok_or_else(|| DomainError::HandlerNotFound(envelope.key().to_owned()))?;
        handler.call(ctx, envelope.into_payload()).await
    }
}

/// Routing table from query key to handler.
pub struct QueryRegistry<U: ?Sized + UnitOfWork> {
    handlers: HashMap<&'static str, Arc<dyn ErasedQueryHandler<U>>>,
}

impl<U: ?Sized + UnitOfWork> Default for QueryRegistry<U> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<U: ?Sized + UnitOfWork> QueryRegistry<U> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `Q::KEY` to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::DuplicateHandler`] if the key is taken.
    pub fn register<Q, H>(&mut self, handler: H) -> Result<(), DomainError>
    where
        Q: Query,
        H: QueryHandler<Q, U> + 'static,
    {
        if self.handlers.contains_key(Q::KEY) {
            return Err(DomainError::DuplicateHandler(Q::KEY.to_owned()));
        }
        self.handlers.insert(
            Q::KEY,
            Arc::new(TypedQuery::<Q, H> {
                handler,
                _query: PhantomData,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> QueryBus<U> for QueryRegistry<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: QueryEnvelope,
    ) -> Result<Box<dyn Any + Send>, DomainError> {
        let handler = self
            .handlers
            .get(envelope.key)
            .ok_or_else(|| DomainError::HandlerNotFound(envelope.key.to_owned()))?;
        handler.call(ctx, envelope.payload).await
    }
}

/// Dispatches a typed command through `bus` and recovers the typed result.
///
/// # Errors
///
/// Any pipeline failure, or [`DomainError::ResultTypeMismatch`] if a layer
/// substituted a result of a different type.
pub async fn dispatch<C, U, B>(
    bus: &B,
    ctx: &mut RequestContext<U>,
    command: C,
) -> Result<C::Output, DomainError>
where
    C: Command,
    U: ?Sized + UnitOfWork,
    B: CommandBus<U> + ?Sized,
{
    let output = bus.handle(ctx, CommandEnvelope::new(command)).await?;
    output
        .into_any()
        .downcast::<C::Output>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            DomainError::ResultTypeMismatch(format!(
                "{} expected {}",
                C::KEY,
                type_name::<C::Output>()
            ))
        })
}

/// Asks a typed query through `bus` and recovers the typed result.
///
/// # Errors
///
/// Any pipeline failure, or [`DomainError::ResultTypeMismatch`].
pub async fn ask<Q, U, B>(
    bus: &B,
    ctx: &mut RequestContext<U>,
    query: Q,
) -> Result<Q::Output, DomainError>
where
    Q: Query,
    U: ?Sized + UnitOfWork,
    B: QueryBus<U> + ?Sized,
{
    let output = bus.handle(ctx, QueryEnvelope::new(query)).await?;
    output.downcast::<Q::Output>().map(|boxed| *boxed).map_err(|_| {
        DomainError::ResultTypeMismatch(format!("{} expected {}", Q::KEY, type_name::<Q::Output>()))
    })
}
