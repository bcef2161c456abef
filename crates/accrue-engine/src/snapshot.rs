//! Versioned engine state export.
//!
//! Binary form is bincode (standard config); JSON is available through serde
//! for inspection. Decoding checks the version byte and the book invariants
//! before handing anything back.

use serde::{Deserialize, Serialize};

use accrue_core::constants::SNAPSHOT_VERSION;
use accrue_core::error::{AccrueError, AccrueResult};
use accrue_core::types::{AccountId, AccountPosition, EpochRecord, GlobalAccrualState, Split};

/// Full engine state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct EngineSnapshot {
    pub version: u8,
    pub global: GlobalAccrualState,
    /// Sorted by account.
    pub positions: Vec<(AccountId, AccountPosition)>,
    pub epochs: Vec<EpochRecord>,
}

impl EngineSnapshot {
    pub fn new(
        global: GlobalAccrualState,
        positions: Vec<(AccountId, AccountPosition)>,
        epochs: Vec<EpochRecord>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            global,
            positions,
            epochs,
        }
    }

    pub fn encode(&self) -> AccrueResult<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| AccrueError::Snapshot(format!("encode: {e}")))
    }

    /// Decode and verify. Trailing bytes are rejected.
    pub fn decode(bytes: &[u8]) -> AccrueResult<Self> {
        let (snap, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| AccrueError::Snapshot(format!("decode: {e}")))?;
        if read != bytes.len() {
            return Err(AccrueError::Snapshot(format!(
                "{} trailing bytes",
                bytes.len() - read
            )));
        }
        snap.verify()?;
        Ok(snap)
    }

    /// Check version and internal consistency.
    pub fn verify(&self) -> AccrueResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(AccrueError::Snapshot(format!(
                "unsupported version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )));
        }
        if self.epochs.len() as u64 != self.global.epoch_counter {
            return Err(AccrueError::Snapshot(format!(
                "{} epoch records for counter {}",
                self.epochs.len(),
                self.global.epoch_counter
            )));
        }

        let mut sum: u128 = 0;
        let mut prev: Option<&AccountId> = None;
        for (id, pos) in &self.positions {
            if prev.is_some_and(|p| p >= id) {
                return Err(AccrueError::Snapshot(format!("positions unsorted or duplicated at {id}")));
            }
            prev = Some(id);
            if pos.index_snapshot > self.global.index {
                return Err(AccrueError::Snapshot(format!("{id}: snapshot ahead of index")));
            }
            if pos.principal == 0 && pos.split != Split::NONE {
                return Err(AccrueError::Snapshot(format!("{id}: split on empty position")));
            }
            sum += pos.principal as u128;
        }
        if sum != self.global.total_principal as u128 {
            return Err(AccrueError::Snapshot(format!(
                "total_principal {} != sum of positions {sum}",
                self.global.total_principal
            )));
        }
        Ok(())
    }
}
