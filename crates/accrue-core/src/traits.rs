//! Trait interfaces for Accrue.
//!
//! These traits are the seams between the core and everything it does not own:
//! - [`Clock`]: wall-clock source
//! - [`AssetTransfer`]: moves the pooled asset in and out of a custody account
//! - [`BeneficiaryGateway`]: credits a beneficiary on a participant's behalf
//! - [`Authorizer`]: role checks for admin and notifier boundaries
//! - [`AccrualNotifier`]: what the ledger forwards principal changes to
//! - [`EventSink`]: off-process indexing of structured records

use std::sync::Arc;

use crate::error::{AccrueResult, AuthError, GatewayError, TransferError};
use crate::events::Event;
use crate::types::{AccountId, Role, Split};

/// Source of the current time in unix seconds.
///
/// Implementations may return a value lower than a previous read; consumers
/// treat that as zero elapsed time.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Fungible transfer capability scoped to one custody account.
///
/// Both operations either move exactly `amount` or fail; short transfers are
/// not allowed.
pub trait AssetTransfer: Send + Sync {
    /// Move `amount` from `from` into this custody account.
    fn pull(&self, from: &AccountId, amount: u64) -> Result<(), TransferError>;

    /// Move `amount` out of this custody account to `to`.
    fn push(&self, to: &AccountId, amount: u64) -> Result<(), TransferError>;
}

/// Credit-ledger capability run by whoever tracks beneficiary entitlements.
///
/// The engine moves the beneficiary share into [`custody_account`] and then
/// calls [`credit_beneficiary`]. Both happen after the engine has committed
/// its own bookkeeping for the claim, and either may call back into the engine.
///
/// [`custody_account`]: Self::custody_account
/// [`credit_beneficiary`]: Self::credit_beneficiary
pub trait BeneficiaryGateway: Send + Sync {
    /// Account that holds funds credited to beneficiaries.
    fn custody_account(&self) -> AccountId;

    fn credit_beneficiary(
        &self,
        beneficiary: &AccountId,
        contributor: &AccountId,
        amount: u64,
    ) -> Result<(), GatewayError>;
}

/// Capability check resolved against a caller identity.
pub trait Authorizer: Send + Sync {
    /// Whether `caller` currently holds `role`.
    fn has_role(&self, caller: &AccountId, role: Role) -> bool;

    /// Fail with [`AuthError::Unauthorized`] unless `caller` holds `role`.
    ///
    /// Default implementation delegates to [`has_role`](Self::has_role).
    fn assert_authorized(&self, caller: &AccountId, role: Role) -> Result<(), AuthError> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            Err(AuthError::Unauthorized {
                caller: *caller,
                role,
            })
        }
    }
}

/// Receiver of principal changes, implemented by the accrual engine.
///
/// `caller` is the identity of the forwarding ledger and must hold
/// [`Role::LedgerNotifier`].
pub trait AccrualNotifier: Send + Sync {
    fn notify_increase(
        &self,
        caller: &AccountId,
        account: &AccountId,
        amount: u64,
        beneficiary: Option<AccountId>,
        share_bps: u32,
    ) -> AccrueResult<()>;

    fn notify_decrease(&self, caller: &AccountId, account: &AccountId, amount: u64) -> AccrueResult<()>;

    /// Current split of `account`, so a caller can restore it after undoing a decrease.
    fn split_of(&self, account: &AccountId) -> Split;
}

/// Destination for structured records. Never used for control flow.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &Event);
}

/// The collaborators every component needs, bundled for construction.
#[derive(Clone)]
pub struct Services {
    /// Transfer handle scoped to the component's own custody account.
    pub asset: Arc<dyn AssetTransfer>,
    pub auth: Arc<dyn Authorizer>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
}
