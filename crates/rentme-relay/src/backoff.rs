//! Retry schedule for failed deliveries.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Delay used when the schedule is empty.
pub const FALLBACK_DELAY: Duration = Duration::from_secs(5);

/// Ordered retry delays. Attempt `n` (0-indexed) waits `schedule[n]`; once
/// the schedule is exhausted its last entry repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    schedule: Vec<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ])
    }
}

impl Backoff {
    #[must_use]
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    #[must_use]
    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    /// Delay before the retry that follows `attempts` earlier failures.
    #[must_use]
    pub fn delay(&self, attempts: i32) -> Duration {
        let index = usize::try_from(attempts).unwrap_or(0);
        self.schedule
            .get(index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or(FALLBACK_DELAY)
    }

    /// When a record that has failed `attempts` times before may be claimed
    /// again.
    #[must_use]
    pub fn next_attempt_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.delay(attempts))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
