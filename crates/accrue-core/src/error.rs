//! Error types for Accrue.
//!
//! Every failure is local to the call that raised it and leaves no partial
//! state behind. [`AccrueError::kind`] gives callers an unambiguous class.
use thiserror::Error;

use crate::types::{AccountId, Role};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{caller} lacks role {role}")] Unauthorized { caller: AccountId, role: Role },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be non-zero")] ZeroAmount,
    #[error("share out of range: {0} bps")] ShareOutOfRange(u32),
    #[error("non-zero share requires a beneficiary")] MissingBeneficiary,
    #[error("rate too high: {rate} > {max}")] RateTooHigh { rate: u64, max: u64 },
    #[error("epoch too early: next allowed at {next_allowed}, now {now}")] EpochTooEarly { next_allowed: u64, now: u64 },
    #[error("lock period too long: {period} > {max}")] LockPeriodTooLong { period: u64, max: u64 },
    #[error("epoch duration must be non-zero")] ZeroEpochDuration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("insufficient balance: have {have}, need {need}")] InsufficientBalance { have: u64, need: u64 },
    #[error("still locked until {until} (now {now})")] StillLocked { until: u64, now: u64 },
    #[error("nothing to claim")] NothingToClaim,
    #[error("insufficient pool: have {pool}, need {need}")] InsufficientPool { pool: u64, need: u64 },
    #[error("reentrant call into {0}")] Reentrancy(&'static str),
    #[error("no accrual engine configured")] EngineNotSet,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("arithmetic fault")] ArithmeticFault,
    #[error("ledger and engine principal diverged: {reason}")] MirrorDiverged { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("pull of {amount} from {from} failed: {reason}")] PullFailed { from: AccountId, amount: u64, reason: String },
    #[error("push of {amount} to {to} failed: {reason}")] PushFailed { to: AccountId, amount: u64, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("credit of {amount} to {beneficiary} rejected: {reason}")] CreditRejected { beneficiary: AccountId, amount: u64, reason: String },
}

/// Coarse classification for the workflow layer above the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Validation,
    State,
    Arithmetic,
    Collaborator,
    Snapshot,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrueError {
    #[error(transparent)] Auth(#[from] AuthError),
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] State(#[from] StateError),
    #[error(transparent)] Math(#[from] MathError),
    #[error(transparent)] Transfer(#[from] TransferError),
    #[error(transparent)] Gateway(#[from] GatewayError),
    #[error("snapshot: {0}")] Snapshot(String),
}

impl AccrueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::State(_) => ErrorKind::State,
            Self::Math(_) => ErrorKind::Arithmetic,
            Self::Transfer(_) | Self::Gateway(_) => ErrorKind::Collaborator,
            Self::Snapshot(_) => ErrorKind::Snapshot,
        }
    }
}

pub type AccrueResult<T> = Result<T, AccrueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(AccrueError::from(ValidationError::ZeroAmount).kind(), ErrorKind::Validation);
        assert_eq!(AccrueError::from(StateError::NothingToClaim).kind(), ErrorKind::State);
        assert_eq!(AccrueError::from(MathError::ArithmeticFault).kind(), ErrorKind::Arithmetic);
        let diverged = MathError::MirrorDiverged { reason: "notify failed".into() };
        assert_eq!(AccrueError::from(diverged).kind(), ErrorKind::Arithmetic);
        let auth = AuthError::Unauthorized { caller: AccountId::ZERO, role: Role::Admin };
        assert_eq!(AccrueError::from(auth).kind(), ErrorKind::Authorization);
        let gw = GatewayError::CreditRejected {
            beneficiary: AccountId::ZERO,
            amount: 1,
            reason: "closed".into(),
        };
        assert_eq!(AccrueError::from(gw).kind(), ErrorKind::Collaborator);
    }

    #[test]
    fn messages_are_transparent() {
        let err = AccrueError::from(StateError::InsufficientPool { pool: 5, need: 9 });
        assert_eq!(err.to_string(), "insufficient pool: have 5, need 9");
    }
}
