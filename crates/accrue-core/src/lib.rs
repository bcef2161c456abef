//! # accrue-core
//! Foundation types and traits for the Accrue reward engine.
//!
//! - [`math`]: WAD fixed-point helpers, all checked
//! - [`traits`]: the seams to external collaborators (asset transfer,
//!   beneficiary gateway, authorization, clock, event sink)
//! - [`memory`]: in-memory collaborators for tests and local simulation

pub mod auth;
pub mod clock;
pub mod constants;
pub mod error;
pub mod events;
pub mod guard;
pub mod math;
pub mod memory;
pub mod traits;
pub mod types;
