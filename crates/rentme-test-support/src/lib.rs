//! Shared test doubles for the Rentme crates.

mod clock;
mod outbox;

pub use clock::{FixedClock, ManualClock};
pub use outbox::{FailingOutbox, RecordingOutbox};
