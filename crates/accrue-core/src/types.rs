//! Core data model: identities, roles, splits, positions and epoch records.
//!
//! Amounts are in base units of the single pooled asset (u64). The accrual
//! index is WAD fixed-point and kept in u128.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{INITIAL_INDEX, MAX_SHARE_BPS};
use crate::error::ValidationError;

/// A 32-byte participant, beneficiary or operator identity.
///
/// Serializes as a 64-character hex string.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// The all-zero identity. Never a valid beneficiary.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Derive a stable identity from a human-readable label (BLAKE3 of the label).
    ///
    /// # Examples
    ///
    /// ```
    /// use accrue_core::types::AccountId;
    /// assert_eq!(AccountId::derive("alice"), AccountId::derive("alice"));
    /// assert_ne!(AccountId::derive("alice"), AccountId::derive("bob"));
    /// ```
    pub fn derive(label: &str) -> Self {
        Self(*blake3::hash(label.as_bytes()).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for AccountId {
    type Err = hex::FromHexError;

    /// Parse a 64-character hex identity.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Capabilities checked by the injected [`Authorizer`](crate::traits::Authorizer).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub enum Role {
    /// Configuration and treasury operations.
    Admin,
    /// The single ledger allowed to report principal changes to the engine.
    LedgerNotifier,
    /// May close epochs.
    EpochKeeper,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::LedgerNotifier => "ledger-notifier",
            Role::EpochKeeper => "epoch-keeper",
        };
        f.write_str(name)
    }
}

/// How a participant's claims are divided with a beneficiary.
///
/// Locked in when the position goes from zero to positive principal and
/// cleared when it returns to zero.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Split {
    /// Who receives the beneficiary share.
    pub beneficiary: Option<AccountId>,
    /// Beneficiary share in basis points, `0..=10_000`.
    pub share_bps: u32,
}

impl Split {
    /// No beneficiary; every claim goes entirely to the participant.
    pub const NONE: Self = Self {
        beneficiary: None,
        share_bps: 0,
    };

    /// Build a split, rejecting out-of-range shares and shares without a beneficiary.
    ///
    /// A zero identity counts as "no beneficiary".
    ///
    /// # Examples
    ///
    /// ```
    /// use accrue_core::types::{AccountId, Split};
    /// let b = AccountId::derive("charity");
    /// assert!(Split::new(Some(b), 5_000).is_ok());
    /// assert!(Split::new(None, 1).is_err());
    /// assert!(Split::new(Some(b), 10_001).is_err());
    /// ```
    pub fn new(beneficiary: Option<AccountId>, share_bps: u32) -> Result<Self, ValidationError> {
        if share_bps > MAX_SHARE_BPS {
            return Err(ValidationError::ShareOutOfRange(share_bps));
        }
        let beneficiary = beneficiary.filter(|b| !b.is_zero());
        if share_bps > 0 && beneficiary.is_none() {
            return Err(ValidationError::MissingBeneficiary);
        }
        Ok(Self {
            beneficiary,
            share_bps,
        })
    }

    /// Whether claims under this split route anything to a beneficiary.
    pub fn is_active(&self) -> bool {
        self.share_bps > 0 && self.beneficiary.is_some()
    }
}

/// Per-account accrual state held by the engine.
///
/// # Invariants
///
/// * `index_snapshot <= GlobalAccrualState::index`
/// * `split == Split::NONE` whenever `principal == 0`
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AccountPosition {
    /// Deposited amount currently earning.
    pub principal: u64,
    /// Index value at the account's last interaction.
    pub index_snapshot: u128,
    /// Yield settled at earlier snapshot moves and not yet claimed.
    pub accrued: u64,
    /// Claim routing.
    pub split: Split,
}

impl AccountPosition {
    /// A fresh, empty position snapshotted at `index`.
    pub fn new(index: u128) -> Self {
        Self {
            principal: 0,
            index_snapshot: index,
            accrued: 0,
            split: Split::NONE,
        }
    }
}

/// Per-account principal and lock held by the ledger.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct LedgerEntry {
    pub principal: u64,
    /// Unix seconds before which withdrawal is refused.
    pub lock_expiry: u64,
}

/// Process-wide accrual state, mutated only by the engine.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GlobalAccrualState {
    /// WAD-scaled cumulative reward per unit of principal. Never decreases.
    pub index: u128,
    /// Unix seconds of the last index accrual.
    pub last_update_time: u64,
    /// WAD-scaled annual rate, `0..=MAX_RATE_PER_YEAR`.
    pub rate_per_year: u64,
    /// Sum of all positions' principal.
    pub total_principal: u64,
    /// Value available to pay claims.
    pub pool: u64,
    /// Number of epochs closed so far.
    pub epoch_counter: u64,
    /// Unix seconds at which the current epoch opened.
    pub last_epoch_time: u64,
    /// Lifetime sum of successful claims.
    pub total_claimed: u64,
}

impl GlobalAccrualState {
    /// State at engine creation: index 1.0, empty pool, epoch 0 opening at `now`.
    pub fn genesis(now: u64, rate_per_year: u64) -> Self {
        Self {
            index: INITIAL_INDEX,
            last_update_time: now,
            rate_per_year,
            total_principal: 0,
            pool: 0,
            epoch_counter: 0,
            last_epoch_time: now,
            total_claimed: 0,
        }
    }
}

/// Immutable analytics snapshot appended when an epoch closes.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct EpochRecord {
    /// Notional yield the whole book earned during the epoch.
    pub accrued_this_epoch: u64,
    pub total_principal_at_snapshot: u64,
    pub rate_at_snapshot: u64,
    /// Unix seconds at which the epoch closed.
    pub recorded_at: u64,
}

/// Outcome of a successful claim.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub total: u64,
    pub to_caller: u64,
    pub to_beneficiary: u64,
    pub beneficiary: Option<AccountId>,
    pub epoch: u64,
}
