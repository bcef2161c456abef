//! # accrue-engine: Proportional reward accrual.
//!
//! All calculations use integer arithmetic only.
//!
//! - **Lazy global index**: a single WAD-scaled index grows by
//!   `rate * elapsed / SECONDS_PER_YEAR` whenever anything touches it, so no
//!   operation iterates over participants.
//! - **Per-account snapshots**: pending yield is `principal * (index - snapshot)`
//!   plus yield settled at earlier principal changes.
//! - **Claim-time splits**: each claim is divided between the participant and
//!   an optional beneficiary, with bookkeeping committed before any payout.
//! - **Epochs**: admin-triggered analytics snapshots, append-only.

pub mod config;
pub mod engine;
pub mod index;
pub mod snapshot;

pub use config::EngineConfig;
pub use engine::AccrualEngine;
pub use snapshot::EngineSnapshot;
