//! The relay loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rentme_bus::outbox::{OutboxEntry, OutboxStore};
use rentme_core::clock::Clock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::envelope::{message_headers, topic_for, Envelope};
use crate::error::RelayError;
use crate::producer::Producer;

pub const DEFAULT_SOURCE: &str = "app://rentme";

/// Settings of one relay worker.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Recorded on every claim this worker makes.
    pub worker_id: String,
    pub poll_interval: Duration,
    pub topic_prefix: String,
    /// Envelope `source`.
    pub source: String,
    pub backoff: Backoff,
    /// Formatting failures a record may accumulate before it becomes `DEAD`.
    pub max_format_attempts: i32,
    /// Claims older than this are returned to the pool by the sweep.
    pub claim_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("relay-{}", Uuid::new_v4()),
            poll_interval: Duration::from_millis(500),
            topic_prefix: String::new(),
            source: DEFAULT_SOURCE.to_owned(),
            backoff: Backoff::default(),
            max_format_attempts: 3,
            claim_timeout: Duration::from_secs(60),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was claimable.
    Idle,
    Sent { id: Uuid },
    /// Delivery failed and the record will be retried.
    Rescheduled {
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
    },
    /// The record is poison and will not be retried.
    Dead { id: Uuid },
}

/// Claims, publishes, and settles outbox records one at a time.
pub struct RelayWorker {
    store: Arc<dyn OutboxStore>,
    producer: Arc<dyn Producer>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl RelayWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        producer: Arc<dyn Producer>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            producer,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Claims at most one record and drives it to its next state.
    ///
    /// Delivery failures are settled on the record and reported through the
    /// outcome, not as an error.
    ///
    /// # Errors
    ///
    /// [`RelayError::Store`] if the store cannot claim or settle the record.
    pub async fn tick(&self) -> Result<TickOutcome, RelayError> {
        let Some(entry) = self
            .store
            .claim(&self.config.worker_id, self.clock.now())
            .await?
        else {
            return Ok(TickOutcome::Idle);
        };
        let id = entry.record.id;
        debug!(
            outbox_id = %id,
            event = %entry.record.name,
            attempts = entry.attempts,
            worker_id = %self.config.worker_id,
            "outbox record claimed"
        );

        match self.deliver(&entry).await {
            Ok(topic) => {
                self.store.mark_sent(id, self.clock.now()).await?;
                info!(outbox_id = %id, topic = %topic, "outbox record sent");
                Ok(TickOutcome::Sent { id })
            }
            Err(failure) => self.settle_failure(&entry, &failure).await,
        }
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<String, RelayError> {
        let record = &entry.record;
        let topic = topic_for(&self.config.topic_prefix, &record.name);
        let body = Envelope::wrap(record, &self.config.source)?.to_bytes()?;
        self.producer
            .publish(&topic, &record.aggregate_id, &body, &message_headers(record))
            .await?;
        Ok(topic)
    }

    async fn settle_failure(
        &self,
        entry: &OutboxEntry,
        failure: &RelayError,
    ) -> Result<TickOutcome, RelayError> {
        let id = entry.record.id;
        let reason = failure.to_string();
        if failure.is_permanent() && entry.attempts + 1 >= self.config.max_format_attempts {
            self.store.mark_dead(id, &reason).await?;
            error!(
                outbox_id = %id,
                attempts = entry.attempts + 1,
                error = %reason,
                "outbox record is poison, marked dead"
            );
            return Ok(TickOutcome::Dead { id });
        }
        let next_attempt_at = self
            .config
            .backoff
            .next_attempt_at(entry.attempts, self.clock.now());
        self.store.mark_failed(id, next_attempt_at, &reason).await?;
        warn!(
            outbox_id = %id,
            attempts = entry.attempts + 1,
            %next_attempt_at,
            error = %reason,
            "outbox delivery failed, rescheduled"
        );
        Ok(TickOutcome::Rescheduled {
            id,
            next_attempt_at,
        })
    }

    /// Returns claims older than the claim timeout to the pool.
    ///
    /// # Errors
    ///
    /// [`RelayError::Store`] if the store fails.
    pub async fn sweep(&self) -> Result<u64, RelayError> {
        let timeout = TimeDelta::from_std(self.config.claim_timeout).unwrap_or(TimeDelta::MAX);
        let now = self.clock.now();
        let claimed_before = now
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let released = self.store.release_stale_claims(claimed_before).await?;
        if released > 0 {
            warn!(released, "stale outbox claims released");
        }
        Ok(released)
    }

    /// Ticks every poll interval until `cancel` fires. The current tick is
    /// always finished; errors are logged and never stop the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sweep: Option<Instant> = None;
        info!(worker_id = %self.config.worker_id, "outbox relay started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let sweep_due = last_sweep.is_none_or(|at| at.elapsed() >= self.config.claim_timeout);
            if sweep_due {
                if let Err(e) = self.sweep().await {
                    error!(error = %e, "stale claim sweep failed");
                }
                last_sweep = Some(Instant::now());
            }

            if let Err(e) = self.tick().await {
                error!(worker_id = %self.config.worker_id, error = %e, "outbox relay tick failed");
            }
        }

        info!(worker_id = %self.config.worker_id, "outbox relay stopped");
    }
}
