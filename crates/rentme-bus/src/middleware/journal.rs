//! Journaling unit-of-work doubles for the layer tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rentme_core::error::DomainError;
use tokio::time::Instant;

use super::{CommandLayer, OutboxFlushLayer, TransactionLayer, chain_commands};
use crate::bus::{CommandBus, CommandHandler, CommandRegistry, QueryHandler};
use crate::command::{Command, Query};
use crate::context::RequestContext;
use crate::outbox::{EventRecord, Outbox};
use crate::uow::{TxOptions, UnitOfWork, UnitOfWorkFactory};

type Journal = Arc<Mutex<Vec<&'static str>>>;

pub(crate) struct JournalUnit {
    journal: Journal,
    options: TxOptions,
    fail_commit: bool,
    fail_flush: bool,
}

#[async_trait]
impl Outbox for JournalUnit {
    async fn add(&self, _records: Vec<EventRecord>) -> Result<(), DomainError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), DomainError> {
        self.journal.lock().unwrap().push("flush");
        if self.fail_flush {
            return Err(DomainError::Infrastructure("outbox down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for JournalUnit {
    fn outbox(&self) -> &dyn Outbox {
        self
    }

    async fn commit(&self) -> Result<(), DomainError> {
        self.journal.lock().unwrap().push("commit");
        if self.fail_commit {
            return Err(DomainError::Infrastructure("commit refused".into()));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DomainError> {
        self.journal.lock().unwrap().push("rollback");
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct JournalFactory {
    pub(crate) journal: Journal,
    pub(crate) fail_commit: bool,
    pub(crate) fail_flush: bool,
}

impl JournalFactory {
    pub(crate) fn journal(&self) -> Vec<&'static str> {
        self.journal.lock().unwrap().clone()
    }

    /// A unit that journals to a separate log, for pre-bound contexts.
    pub(crate) fn unit(&self) -> Arc<JournalUnit> {
        Arc::new(JournalUnit {
            journal: Journal::default(),
            options: TxOptions::default(),
            fail_commit: false,
            fail_flush: false,
        })
    }
}

#[async_trait]
impl UnitOfWorkFactory<JournalUnit> for JournalFactory {
    async fn begin(
        &self,
        options: TxOptions,
        _deadline: Option<Instant>,
    ) -> Result<Arc<JournalUnit>, DomainError> {
        self.journal.lock().unwrap().push("begin");
        Ok(Arc::new(JournalUnit {
            journal: Arc::clone(&self.journal),
            options,
            fail_commit: self.fail_commit,
            fail_flush: self.fail_flush,
        }))
    }
}

pub(crate) enum Mode {
    Succeed,
    Fail,
    Panic,
    Stall,
}

pub(crate) struct Step(pub(crate) Mode);

impl Command for Step {
    const KEY: &'static str = "test.step";
    type Output = u32;
}

struct StepHandler;

#[async_trait]
impl CommandHandler<Step, JournalUnit> for StepHandler {
    async fn handle(
        &self,
        ctx: &mut RequestContext<JournalUnit>,
        command: Step,
    ) -> Result<u32, DomainError> {
        ctx.uow()?;
        match command.0 {
            Mode::Succeed => Ok(1),
            Mode::Fail => Err(DomainError::Validation("nope".into())),
            Mode::Panic => panic!("handler blew up"),
            Mode::Stall => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0)
            }
        }
    }
}

/// Transaction, optionally flush, then the step handler.
pub(crate) fn journal_pipeline(
    factory: &Arc<JournalFactory>,
    with_flush: bool,
) -> Arc<dyn CommandBus<JournalUnit>> {
    let mut registry = CommandRegistry::new();
    registry.register::<Step, _>(StepHandler).unwrap();
    let base: Arc<dyn CommandBus<JournalUnit>> = Arc::new(registry);
    let mut layers: Vec<Box<dyn CommandLayer<JournalUnit>>> = vec![Box::new(TransactionLayer::new(
        Arc::clone(factory) as Arc<dyn UnitOfWorkFactory<JournalUnit>>,
    ))];
    if with_flush {
        layers.push(Box::new(OutboxFlushLayer));
    }
    chain_commands(base, &layers)
}

/// Reports whether the bound unit is read-only.
pub(crate) struct Peek;

impl Query for Peek {
    const KEY: &'static str = "test.peek";
    type Output = bool;
}

pub(crate) struct PeekHandler;

#[async_trait]
impl QueryHandler<Peek, JournalUnit> for PeekHandler {
    async fn handle(
        &self,
        ctx: &mut RequestContext<JournalUnit>,
        _query: Peek,
    ) -> Result<bool, DomainError> {
        Ok(ctx.uow()?.options.read_only)
    }
}
