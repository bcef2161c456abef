//! Integration test suite for Accrue.
//!
//! Exercises the ledger and engine together through their public entry
//! points: the reference scenarios, hostile collaborators that call back in
//! or fail on demand, and randomized operation sequences checked against the
//! book-wide invariants.

pub mod helpers;
