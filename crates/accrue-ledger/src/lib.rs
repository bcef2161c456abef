//! # accrue-ledger: Participant principal custody.
//!
//! Holds deposited principal, enforces the lock period on withdrawal and
//! forwards every principal change to the accrual engine through
//! [`AccrualNotifier`](accrue_core::traits::AccrualNotifier). The ledger never
//! computes yield itself.

pub mod config;
pub mod ledger;

pub use config::LedgerConfig;
pub use ledger::ParticipantLedger;
