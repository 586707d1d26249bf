//! Rentme Store: storage adapters.
//!
//! Two interchangeable backends implement the booking Unit-of-Work, the
//! durable outbox, and the idempotency store:
//!
//! * [`memory`] keeps everything in process. Writes of a unit are buffered
//!   and applied atomically at commit.
//! * [`postgres`] runs every unit on one `sqlx` transaction and claims
//!   outbox rows with `FOR UPDATE SKIP LOCKED`.

pub mod memory;
pub mod postgres;
