//! Rentme Bus: the idempotent command pipeline.
//!
//! Commands and queries are routed by a stable string key to strongly typed
//! handlers. A pipeline is an ordered list of middleware layers folded around
//! the handler registry; the reference write pipeline is
//! logging, idempotency, validation, transaction, outbox flush.
//!
//! Handlers receive the [`context::RequestContext`] explicitly; the
//! transaction layer binds the Unit-of-Work to it for the duration of one call.

pub mod bus;
pub mod command;
pub mod context;
pub mod idempotency;
pub mod middleware;
pub mod outbox;
pub mod uow;

pub use bus::{ask, dispatch, CommandBus, CommandRegistry, QueryBus, QueryRegistry};
pub use command::{Command, Query};
pub use context::RequestContext;
