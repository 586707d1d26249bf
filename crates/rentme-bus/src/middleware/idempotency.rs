//! At-most-once execution per idempotency key.
//!
//! The first call under a key runs the inner pipeline and records its
//! outcome, success or failure. Later calls replay the recorded outcome
//! without touching the handler. Calls sharing a key are serialised within
//! the process, and the store's insert-if-absent save settles races between
//! processes in favour of whichever record landed first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use rentme_core::clock::Clock;
use rentme_core::error::DomainError;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};

use super::CommandLayer;
use crate::bus::{CommandBus, CommandEnvelope, ErasedOutput, OutputDecoder};
use crate::context::{RequestContext, bounded};
use crate::idempotency::{
    IdempotencyRecord, IdempotencyStore, RecordedOutcome, SaveOutcome, decode_failure,
};
use crate::uow::UnitOfWork;

/// Per-key async mutexes. Entries are dropped once nobody holds or waits on
/// them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    /// Waits until no other holder of `key` remains.
    pub async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.to_owned()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_owned(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds one key of a [`KeyedLocks`] until dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

/// Deduplicates commands carrying an idempotency key.
pub struct IdempotencyLayer {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    ttl: Option<TimeDelta>,
    locks: Arc<KeyedLocks>,
}

impl IdempotencyLayer {
    /// Records never expire unless [`IdempotencyLayer::with_ttl`] is set.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: None,
            locks: Arc::new(KeyedLocks::default()),
        }
    }

    /// Lets a key be executed again `ttl` after its first execution.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = TimeDelta::from_std(ttl).ok();
        self
    }
}

struct Idempotent<U: ?Sized + UnitOfWork> {
    next: Arc<dyn CommandBus<U>>,
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    ttl: Option<TimeDelta>,
    locks: Arc<KeyedLocks>,
}

impl<U: ?Sized + UnitOfWork> CommandLayer<U> for IdempotencyLayer {
    fn layer(&self, next: Arc<dyn CommandBus<U>>) -> Arc<dyn CommandBus<U>> {
        Arc::new(Idempotent {
            next,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ttl: self.ttl,
            locks: Arc::clone(&self.locks),
        })
    }
}

fn replay(
    outcome: &RecordedOutcome,
    decode: OutputDecoder,
) -> Result<Box<dyn ErasedOutput>, DomainError> {
    match outcome {
        RecordedOutcome::Success(payload) => decode(payload),
        RecordedOutcome::Failure(text) => Err(decode_failure(text)),
    }
}

#[async_trait]
impl<U: ?Sized + UnitOfWork> CommandBus<U> for Idempotent<U> {
    async fn handle(
        &self,
        ctx: &mut RequestContext<U>,
        envelope: CommandEnvelope,
    ) -> Result<Box<dyn ErasedOutput>, DomainError> {
        let Some(key) = envelope.idempotency_key().map(str::to_owned) else {
            return self.next.handle(ctx, envelope).await;
        };
        let command = envelope.key();
        let decode = envelope.decoder();
        let deadline = ctx.deadline;

        let _guard = bounded(deadline, async { Ok(self.locks.acquire(&key).await) }).await?;

        let cached = bounded(deadline, self.store.get(&key, self.clock.now())).await?;
        if let Some(record) = cached {
            debug!(command, idempotency_key = %key, "replaying recorded outcome");
            return replay(&record.outcome, decode);
        }

        let result = self.next.handle(ctx, envelope).await;
        let outcome = match &result {
            Ok(output) => RecordedOutcome::Success(output.encode()?),
            Err(err) => RecordedOutcome::failure(err),
        };
        let now = self.clock.now();
        let record = IdempotencyRecord {
            key: key.clone(),
            outcome,
            occurred_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
        };

        match bounded(deadline, self.store.save(record)).await {
            Ok(SaveOutcome::Inserted) => result,
            Ok(SaveOutcome::Existing(winner)) => {
                warn!(
                    command,
                    idempotency_key = %key,
                    "key recorded by a concurrent execution; returning its outcome"
                );
                replay(&winner.outcome, decode)
            }
            Err(save_err) => {
                error!(
                    command,
                    idempotency_key = %key,
                    error = %save_err,
                    "failed to record idempotent outcome"
                );
                match result {
                    Err(err) => Err(err),
                    Ok(_) => Err(save_err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{DateTime, Utc};
    use futures::future::join_all;
    use rentme_core::clock::SystemClock;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::bus::{CommandHandler, CommandRegistry, dispatch};
    use crate::bus::tests::NullUnit;
    use crate::command::Command;
    use crate::middleware::chain_commands;

    #[derive(Default)]
    struct MapStore {
        records: Mutex<HashMap<String, IdempotencyRecord>>,
    }

    #[async_trait]
    impl IdempotencyStore for MapStore {
        async fn get(
            &self,
            key: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<IdempotencyRecord>, DomainError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(key)
                .filter(|r| !r.is_expired(now))
                .cloned())
        }

        async fn save(&self, record: IdempotencyRecord) -> Result<SaveOutcome, DomainError> {
            let mut records = self.records.lock().unwrap();
            if let Some(existing) = records.get(&record.key) {
                if !existing.is_expired(record.occurred_at) {
                    return Ok(SaveOutcome::Existing(existing.clone()));
                }
            }
            records.insert(record.key.clone(), record);
            Ok(SaveOutcome::Inserted)
        }
    }

    /// Never finds a record, and always loses the save race to `winner`.
    struct RacingStore {
        winner: IdempotencyRecord,
    }

    #[async_trait]
    impl IdempotencyStore for RacingStore {
        async fn get(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
        ) -> Result<Option<IdempotencyRecord>, DomainError> {
            Ok(None)
        }

        async fn save(&self, _record: IdempotencyRecord) -> Result<SaveOutcome, DomainError> {
            Ok(SaveOutcome::Existing(self.winner.clone()))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ticket {
        number: u32,
    }

    struct Take {
        key: Option<String>,
        fail: bool,
        delay: Duration,
    }

    impl Command for Take {
        const KEY: &'static str = "test.take";
        type Output = Ticket;

        fn idempotency_key(&self) -> Option<&str> {
            self.key.as_deref()
        }
    }

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl CommandHandler<Take, NullUnit> for Counter {
        async fn handle(
            &self,
            _ctx: &mut RequestContext<NullUnit>,
            command: Take,
        ) -> Result<Ticket, DomainError> {
            let number = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            if !command.delay.is_zero() {
                tokio::time::sleep(command.delay).await;
            }
            if command.fail {
                return Err(DomainError::Validation("sold out".into()));
            }
            Ok(Ticket { number })
        }
    }

    fn pipeline(store: Arc<dyn IdempotencyStore>, counter: &Counter) -> Arc<dyn CommandBus<NullUnit>> {
        let mut registry = CommandRegistry::new();
        registry.register::<Take, _>(counter.clone()).unwrap();
        let layers: Vec<Box<dyn CommandLayer<NullUnit>>> =
            vec![Box::new(IdempotencyLayer::new(store, Arc::new(SystemClock)))];
        let base: Arc<dyn CommandBus<NullUnit>> = Arc::new(registry);
        chain_commands(base, &layers)
    }

    fn take(key: Option<&str>, fail: bool) -> Take {
        Take {
            key: key.map(str::to_owned),
            fail,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_without_key_every_call_executes() {
        // Arrange
        let counter = Counter::default();
        let bus = pipeline(Arc::new(MapStore::default()), &counter);
        let mut ctx = RequestContext::new("corr");

        // Act
        let first = dispatch(bus.as_ref(), &mut ctx, take(None, false)).await;
        let second = dispatch(bus.as_ref(), &mut ctx, take(Some(""), false)).await;

        // Assert
        assert_eq!(first, Ok(Ticket { number: 1 }));
        assert_eq!(second, Ok(Ticket { number: 2 }));
    }

    #[tokio::test]
    async fn test_repeated_key_replays_first_result_without_executing() {
        // Arrange
        let counter = Counter::default();
        let bus = pipeline(Arc::new(MapStore::default()), &counter);
        let mut ctx = RequestContext::new("corr");

        // Act
        let first = dispatch(bus.as_ref(), &mut ctx, take(Some("req-42"), false)).await;
        let second = dispatch(bus.as_ref(), &mut ctx, take(Some("req-42"), false)).await;

        // Assert
        assert_eq!(first, Ok(Ticket { number: 1 }));
        assert_eq!(second, first);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recorded_failure_replays_same_error() {
        // Arrange
        let counter = Counter::default();
        let bus = pipeline(Arc::new(MapStore::default()), &counter);
        let mut ctx = RequestContext::new("corr");

        // Act
        let first = dispatch(bus.as_ref(), &mut ctx, take(Some("k"), true)).await;
        let second = dispatch(bus.as_ref(), &mut ctx, take(Some("k"), false)).await;

        // Assert
        let expected = Err(DomainError::Validation("sold out".into()));
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_with_same_key_execute_once() {
        // Arrange
        let counter = Counter::default();
        let bus = pipeline(Arc::new(MapStore::default()), &counter);

        // Act
        let calls = (0..10).map(|_| {
            let bus = Arc::clone(&bus);
            async move {
                let mut ctx = RequestContext::new("corr");
                dispatch(bus.as_ref(), &mut ctx, take(Some("same"), false)).await
            }
        });
        let results = join_all(calls).await;

        // Assert
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(Ticket { number: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_waiting_on_key_gives_up_at_its_deadline() {
        // Arrange
        let counter = Counter::default();
        let bus = pipeline(Arc::new(MapStore::default()), &counter);
        let slow = Take {
            delay: Duration::from_secs(10),
            ..take(Some("k"), false)
        };
        let mut first_ctx = RequestContext::new("first");
        let mut second_ctx = RequestContext::new("second").with_timeout(Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        // Act
        let (first, (second, waited)) = tokio::join!(
            dispatch(bus.as_ref(), &mut first_ctx, slow),
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let result = dispatch(bus.as_ref(), &mut second_ctx, take(Some("k"), false)).await;
                (result, started.elapsed())
            }
        );

        // Assert
        assert_eq!(second, Err(DomainError::DeadlineExceeded));
        assert!(waited < Duration::from_secs(2));
        assert_eq!(first, Ok(Ticket { number: 1 }));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_fails_without_executing() {
        // Arrange
        let store = Arc::new(MapStore::default());
        store.records.lock().unwrap().insert(
            "k".into(),
            IdempotencyRecord {
                key: "k".into(),
                outcome: RecordedOutcome::Success(b"not json".to_vec()),
                occurred_at: Utc::now(),
                expires_at: None,
            },
        );
        let counter = Counter::default();
        let bus = pipeline(store, &counter);
        let mut ctx = RequestContext::new("corr");

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, take(Some("k"), false)).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Decode(_))));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lost_save_race_returns_winning_outcome() {
        // Arrange
        let winner = IdempotencyRecord {
            key: "k".into(),
            outcome: RecordedOutcome::Success(br#"{"number":99}"#.to_vec()),
            occurred_at: Utc::now(),
            expires_at: None,
        };
        let counter = Counter::default();
        let bus = pipeline(Arc::new(RacingStore { winner }), &counter);
        let mut ctx = RequestContext::new("corr");

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, take(Some("k"), false)).await;

        // Assert
        assert_eq!(result, Ok(Ticket { number: 99 }));
    }

    #[tokio::test]
    async fn test_expired_record_allows_re_execution() {
        // Arrange
        let store = Arc::new(MapStore::default());
        store.records.lock().unwrap().insert(
            "k".into(),
            IdempotencyRecord {
                key: "k".into(),
                outcome: RecordedOutcome::Success(br#"{"number":7}"#.to_vec()),
                occurred_at: Utc::now() - TimeDelta::days(8),
                expires_at: Some(Utc::now() - TimeDelta::days(1)),
            },
        );
        let counter = Counter::default();
        let bus = pipeline(store, &counter);
        let mut ctx = RequestContext::new("corr");

        // Act
        let result = dispatch(bus.as_ref(), &mut ctx, take(Some("k"), false)).await;

        // Assert
        assert_eq!(result, Ok(Ticket { number: 1 }));
    }

    #[tokio::test]
    async fn test_keyed_locks_forget_released_keys() {
        let locks = KeyedLocks::default();
        {
            let _a = locks.acquire("a").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
