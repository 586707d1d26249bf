//! Rentme Core: shared kernel.
//!
//! This crate defines the value types, error type, and event abstractions
//! that every other crate depends on. It contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod money;
