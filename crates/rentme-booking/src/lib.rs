//! Rentme: Booking bounded context.
//!
//! Guest reservations against host listings: the `Booking` aggregate and its
//! state machine, cancellation refunds, price breakdowns, the availability
//! calendar, and the command/query handlers that run them inside the
//! idempotent pipeline.

pub mod application;
pub mod domain;
pub mod ports;
