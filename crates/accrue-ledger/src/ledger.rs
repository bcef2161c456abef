//! The participant ledger.
//!
//! Principal lives here and nowhere else; the engine only mirrors it through
//! notifications. Every mutating call either completes fully or leaves the
//! ledger, the engine and custody balances as they were.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use accrue_core::error::{AccrueError, AccrueResult, MathError, StateError, ValidationError};
use accrue_core::events::Event;
use accrue_core::guard::CallGuard;
use accrue_core::traits::{AccrualNotifier, Services};
use accrue_core::types::{AccountId, LedgerEntry, Role, Split};

use crate::config::{check_lock_period, LedgerConfig};

#[derive(Debug)]
struct LedgerState {
    entries: HashMap<AccountId, LedgerEntry>,
    total_principal: u64,
    lock_period: u64,
}

/// Custody of participant principal with per-account lock expiry.
pub struct ParticipantLedger {
    /// Custody account, and the identity presented to the engine.
    id: AccountId,
    state: Mutex<LedgerState>,
    engine: RwLock<Option<Arc<dyn AccrualNotifier>>>,
    services: Services,
    withdraw_guard: CallGuard,
}

impl ParticipantLedger {
    pub fn new(id: AccountId, config: LedgerConfig, services: Services) -> AccrueResult<Self> {
        config.validate()?;
        info!(ledger = %id, lock_period = config.lock_period, "participant ledger created");
        Ok(Self {
            id,
            state: Mutex::new(LedgerState {
                entries: HashMap::new(),
                total_principal: 0,
                lock_period: config.lock_period,
            }),
            engine: RwLock::new(None),
            services,
            withdraw_guard: CallGuard::new(),
        })
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn balance_of(&self, participant: &AccountId) -> u64 {
        self.entry_of(participant).principal
    }

    pub fn lock_expiry_of(&self, participant: &AccountId) -> u64 {
        self.entry_of(participant).lock_expiry
    }

    /// Entry for `participant`; zeroed if they never deposited.
    pub fn entry_of(&self, participant: &AccountId) -> LedgerEntry {
        self.state
            .lock()
            .entries
            .get(participant)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_principal(&self) -> u64 {
        self.state.lock().total_principal
    }

    pub fn lock_period(&self) -> u64 {
        self.state.lock().lock_period
    }

    /// Participants with non-zero principal.
    pub fn participant_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| e.principal > 0)
            .count()
    }

    pub fn has_engine(&self) -> bool {
        self.engine.read().is_some()
    }

    fn engine(&self) -> AccrueResult<Arc<dyn AccrualNotifier>> {
        self.engine
            .read()
            .clone()
            .ok_or(AccrueError::State(StateError::EngineNotSet))
    }

    // ------------------------------------------------------------------
    // Deposit
    // ------------------------------------------------------------------

    /// Lock `amount` of the pooled asset for `participant`.
    ///
    /// The split only takes effect when the participant's principal goes from
    /// zero to positive; on top-ups it is validated and otherwise ignored.
    /// Every deposit, top-ups included, restarts the lock.
    ///
    /// Returns the participant's new balance.
    pub fn deposit(
        &self,
        participant: &AccountId,
        amount: u64,
        beneficiary: Option<AccountId>,
        share_bps: u32,
    ) -> AccrueResult<u64> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let split = Split::new(beneficiary, share_bps)?;
        let engine = self.engine()?;

        // Overflow must surface before any value moves.
        {
            let st = self.state.lock();
            let have = st.entries.get(participant).map(|e| e.principal).unwrap_or(0);
            have.checked_add(amount).ok_or(MathError::ArithmeticFault)?;
            st.total_principal
                .checked_add(amount)
                .ok_or(MathError::ArithmeticFault)?;
        }

        self.services.asset.pull(participant, amount)?;

        if let Err(e) = engine.notify_increase(&self.id, participant, amount, split.beneficiary, split.share_bps) {
            self.refund(participant, amount);
            return Err(e);
        }

        let now = self.services.clock.now();
        let committed = self.credit(participant, amount, now);
        let (entry, total_principal) = match committed {
            Ok(v) => v,
            Err(e) => {
                // Lost a race to a concurrent deposit; unwind the engine and custody.
                if let Err(undo) = engine.notify_decrease(&self.id, participant, amount) {
                    error!(participant = %participant, amount, error = %undo, "engine unwind failed");
                }
                self.refund(participant, amount);
                return Err(e);
            }
        };

        info!(participant = %participant, amount, balance = entry.principal, "deposit");
        self.services.events.record(&Event::Deposited {
            participant: *participant,
            amount,
            new_balance: entry.principal,
            lock_expiry: entry.lock_expiry,
            total_principal,
            timestamp: now,
        });
        Ok(entry.principal)
    }

    fn credit(&self, participant: &AccountId, amount: u64, now: u64) -> AccrueResult<(LedgerEntry, u64)> {
        let mut st = self.state.lock();
        let mut entry = st.entries.get(participant).copied().unwrap_or_default();
        entry.principal = entry.principal.checked_add(amount).ok_or(MathError::ArithmeticFault)?;
        entry.lock_expiry = now.checked_add(st.lock_period).ok_or(MathError::ArithmeticFault)?;
        let total = st
            .total_principal
            .checked_add(amount)
            .ok_or(MathError::ArithmeticFault)?;
        st.entries.insert(*participant, entry);
        st.total_principal = total;
        Ok((entry, total))
    }

    // ------------------------------------------------------------------
    // Withdraw
    // ------------------------------------------------------------------

    /// Return `amount` of principal to `participant`.
    ///
    /// Does not claim accrued yield; that stays claimable on the engine.
    ///
    /// # Errors
    ///
    /// - [`StateError::InsufficientBalance`] if `amount` exceeds the balance
    /// - [`StateError::StillLocked`] before the lock expiry
    /// - [`StateError::Reentrancy`] if called from inside another withdrawal
    /// - [`MathError::MirrorDiverged`] if the push failed and the engine
    ///   position could not be put back
    pub fn withdraw(&self, participant: &AccountId, amount: u64) -> AccrueResult<u64> {
        let _guard = self.withdraw_guard.enter("withdraw")?;
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let engine = self.engine()?;
        let now = self.services.clock.now();

        let (before, total_principal) = {
            let mut st = self.state.lock();
            let before = st.entries.get(participant).copied().unwrap_or_default();
            if amount > before.principal {
                return Err(StateError::InsufficientBalance {
                    have: before.principal,
                    need: amount,
                }
                .into());
            }
            if now < before.lock_expiry {
                return Err(StateError::StillLocked {
                    until: before.lock_expiry,
                    now,
                }
                .into());
            }
            let total = st
                .total_principal
                .checked_sub(amount)
                .ok_or(MathError::ArithmeticFault)?;
            st.entries.insert(
                *participant,
                LedgerEntry {
                    principal: before.principal - amount,
                    ..before
                },
            );
            st.total_principal = total;
            (before, total)
        };

        let split = engine.split_of(participant);
        if let Err(e) = engine.notify_decrease(&self.id, participant, amount) {
            self.restore(participant, before, amount);
            return Err(e);
        }

        if let Err(e) = self.services.asset.push(participant, amount) {
            warn!(participant = %participant, amount, error = %e, "withdrawal push failed, restoring position");
            self.restore(participant, before, amount);
            if let Err(undo) =
                engine.notify_increase(&self.id, participant, amount, split.beneficiary, split.share_bps)
            {
                error!(participant = %participant, amount, error = %undo, "engine restore failed");
                return Err(MathError::MirrorDiverged {
                    reason: format!("withdrawal push failed ({e}) and engine restore failed ({undo})"),
                }
                .into());
            }
            return Err(e.into());
        }

        let new_balance = before.principal - amount;
        info!(participant = %participant, amount, balance = new_balance, "withdraw");
        self.services.events.record(&Event::Withdrawn {
            participant: *participant,
            amount,
            new_balance,
            total_principal,
            timestamp: now,
        });
        Ok(new_balance)
    }

    /// Put back a withdrawal that did not complete.
    fn restore(&self, participant: &AccountId, before: LedgerEntry, amount: u64) {
        let mut st = self.state.lock();
        let entry = st.entries.entry(*participant).or_default();
        entry.principal = entry.principal.saturating_add(amount);
        entry.lock_expiry = entry.lock_expiry.max(before.lock_expiry);
        st.total_principal = st.total_principal.saturating_add(amount);
    }

    fn refund(&self, to: &AccountId, amount: u64) {
        if let Err(e) = self.services.asset.push(to, amount) {
            error!(to = %to, amount, error = %e, "refund failed");
        }
    }

    // ------------------------------------------------------------------
    // Admin configuration
    // ------------------------------------------------------------------

    /// Change the lock applied to future deposits. Existing expiries stand.
    pub fn set_lock_period(&self, caller: &AccountId, period: u64) -> AccrueResult<()> {
        self.services.auth.assert_authorized(caller, Role::Admin)?;
        check_lock_period(period)?;
        let old_period = std::mem::replace(&mut self.state.lock().lock_period, period);
        info!(old_period, new_period = period, "lock period changed");
        self.services.events.record(&Event::LockPeriodChanged {
            old_period,
            new_period: period,
            timestamp: self.services.clock.now(),
        });
        Ok(())
    }

    /// Point future notifications at `engine`.
    pub fn set_accrual_engine(&self, caller: &AccountId, engine: Arc<dyn AccrualNotifier>) -> AccrueResult<()> {
        self.services.auth.assert_authorized(caller, Role::Admin)?;
        *self.engine.write() = Some(engine);
        info!("accrual engine changed");
        self.services.events.record(&Event::EngineChanged {
            timestamp: self.services.clock.now(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for ParticipantLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("ParticipantLedger")
            .field("id", &self.id)
            .field("total_principal", &st.total_principal)
            .field("lock_period", &st.lock_period)
            .finish()
    }
}
