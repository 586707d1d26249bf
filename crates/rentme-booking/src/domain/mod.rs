//! Booking domain model.

pub mod aggregates;
pub mod availability;
pub mod cancellation;
pub mod commands;
pub mod date_range;
pub mod events;
pub mod ids;
pub mod listing;
pub mod pricing;
pub mod queries;
pub mod review;
