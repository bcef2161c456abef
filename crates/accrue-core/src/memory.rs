//! In-memory collaborators for testing and local simulation.
//!
//! [`MemoryVault`] is a single-asset balance table handing out
//! [`AssetTransfer`] handles scoped to a custody account. [`CreditLedger`] is a
//! [`BeneficiaryGateway`] that records credits per beneficiary and
//! contributor. Neither persists anything.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{GatewayError, TransferError};
use crate::traits::{AssetTransfer, BeneficiaryGateway};
use crate::types::AccountId;

#[derive(Debug, Default)]
struct VaultInner {
    balances: HashMap<AccountId, u64>,
    /// Accounts that refuse incoming pushes.
    frozen: HashSet<AccountId>,
}

/// Balance table for the pooled asset.
#[derive(Debug, Default)]
pub struct MemoryVault {
    inner: Mutex<VaultInner>,
}

impl MemoryVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create `amount` out of thin air for `to`. Test setup only.
    pub fn mint(&self, to: AccountId, amount: u64) {
        let mut inner = self.inner.lock();
        let bal = inner.balances.entry(to).or_insert(0);
        *bal = bal.saturating_add(amount);
    }

    pub fn balance_of(&self, who: &AccountId) -> u64 {
        self.inner.lock().balances.get(who).copied().unwrap_or(0)
    }

    /// Sum of all balances. Constant across transfers.
    pub fn total_supply(&self) -> u128 {
        self.inner
            .lock()
            .balances
            .values()
            .map(|v| *v as u128)
            .sum()
    }

    /// Make every transfer into `who` fail until [`thaw`](Self::thaw).
    pub fn freeze(&self, who: AccountId) {
        self.inner.lock().frozen.insert(who);
    }

    pub fn thaw(&self, who: &AccountId) {
        self.inner.lock().frozen.remove(who);
    }

    /// Transfer handle whose `pull`/`push` settle against `custody`.
    pub fn custody(self: &Arc<Self>, custody: AccountId) -> Arc<dyn AssetTransfer> {
        Arc::new(CustodyHandle {
            vault: Arc::clone(self),
            custody,
        })
    }

    fn transfer(&self, from: &AccountId, to: &AccountId, amount: u64) -> Result<(), String> {
        let mut inner = self.inner.lock();
        if inner.frozen.contains(to) {
            return Err(format!("recipient {to} is frozen"));
        }
        let have = inner.balances.get(from).copied().unwrap_or(0);
        if have < amount {
            return Err(format!("balance {have} below {amount}"));
        }
        let to_bal = inner.balances.get(to).copied().unwrap_or(0);
        if from != to {
            let credited = to_bal
                .checked_add(amount)
                .ok_or_else(|| "recipient balance overflow".to_string())?;
            inner.balances.insert(*from, have - amount);
            inner.balances.insert(*to, credited);
        }
        Ok(())
    }
}

/// [`AssetTransfer`] bound to one custody account of a [`MemoryVault`].
#[derive(Debug)]
pub struct CustodyHandle {
    vault: Arc<MemoryVault>,
    custody: AccountId,
}

impl AssetTransfer for CustodyHandle {
    fn pull(&self, from: &AccountId, amount: u64) -> Result<(), TransferError> {
        self.vault
            .transfer(from, &self.custody, amount)
            .map_err(|reason| TransferError::PullFailed {
                from: *from,
                amount,
                reason,
            })
    }

    fn push(&self, to: &AccountId, amount: u64) -> Result<(), TransferError> {
        self.vault
            .transfer(&self.custody, to, amount)
            .map_err(|reason| TransferError::PushFailed {
                to: *to,
                amount,
                reason,
            })
    }
}

#[derive(Debug, Default)]
struct CreditInner {
    by_beneficiary: HashMap<AccountId, u64>,
    by_pair: HashMap<(AccountId, AccountId), u64>,
    rejected: HashSet<AccountId>,
}

/// Beneficiary gateway that only keeps score.
#[derive(Debug)]
pub struct CreditLedger {
    custody: AccountId,
    inner: Mutex<CreditInner>,
}

impl CreditLedger {
    pub fn new(custody: AccountId) -> Arc<Self> {
        Arc::new(Self {
            custody,
            inner: Mutex::new(CreditInner::default()),
        })
    }

    /// Total credited to `beneficiary` across all contributors.
    pub fn credited(&self, beneficiary: &AccountId) -> u64 {
        self.inner
            .lock()
            .by_beneficiary
            .get(beneficiary)
            .copied()
            .unwrap_or(0)
    }

    /// Total credited to `beneficiary` on behalf of `contributor`.
    pub fn credited_by(&self, beneficiary: &AccountId, contributor: &AccountId) -> u64 {
        self.inner
            .lock()
            .by_pair
            .get(&(*beneficiary, *contributor))
            .copied()
            .unwrap_or(0)
    }

    /// Refuse further credits to `beneficiary`.
    pub fn reject(&self, beneficiary: AccountId) {
        self.inner.lock().rejected.insert(beneficiary);
    }
}

impl BeneficiaryGateway for CreditLedger {
    fn custody_account(&self) -> AccountId {
        self.custody
    }

    fn credit_beneficiary(
        &self,
        beneficiary: &AccountId,
        contributor: &AccountId,
        amount: u64,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        if inner.rejected.contains(beneficiary) {
            return Err(GatewayError::CreditRejected {
                beneficiary: *beneficiary,
                amount,
                reason: "beneficiary not accepting credits".into(),
            });
        }
        let total = inner.by_beneficiary.entry(*beneficiary).or_insert(0);
        *total = total.saturating_add(amount);
        let pair = inner.by_pair.entry((*beneficiary, *contributor)).or_insert(0);
        *pair = pair.saturating_add(amount);
        Ok(())
    }
}
