//! The accrual engine.
//!
//! Owns the global index, per-account positions, the reward pool and the
//! epoch history. Principal changes arrive from the ledger through
//! [`AccrualNotifier`]; participants pull their yield with
//! [`claim`](AccrualEngine::claim).
//!
//! Every operation computes on copies of the state it touches and commits in
//! one step, so a failed call leaves nothing behind. Claims commit before any
//! external call; a collaborator calling back in sees the pool already
//! decremented and the caller's pending yield already zeroed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use accrue_core::constants::MAX_RATE_PER_YEAR;
use accrue_core::error::{
    AccrueError, AccrueResult, MathError, StateError, ValidationError,
};
use accrue_core::events::Event;
use accrue_core::guard::CallGuard;
use accrue_core::math::{epoch_accrual, split_amount};
use accrue_core::traits::{AccrualNotifier, BeneficiaryGateway, Services};
use accrue_core::types::{
    AccountId, AccountPosition, ClaimReceipt, EpochRecord, GlobalAccrualState, Role, Split,
};

use crate::config::EngineConfig;
use crate::index::{accrue, pending, projected_index, settle};
use crate::snapshot::EngineSnapshot;

#[derive(Debug, Clone)]
pub(crate) struct EngineState {
    pub(crate) global: GlobalAccrualState,
    pub(crate) positions: HashMap<AccountId, AccountPosition>,
    pub(crate) epochs: Vec<EpochRecord>,
}

/// A payout leg that failed, and how much of its amount is back in engine custody.
struct LegFailure {
    error: AccrueError,
    recovered: u64,
}

/// How a committed claim is to be paid out.
struct Payout {
    receipt: ClaimReceipt,
    gateway: Option<Arc<dyn BeneficiaryGateway>>,
}

/// Lazy-index reward engine.
pub struct AccrualEngine {
    /// Identity of the engine's pool custody account.
    id: AccountId,
    state: Mutex<EngineState>,
    gateway: RwLock<Option<Arc<dyn BeneficiaryGateway>>>,
    services: Services,
    min_epoch_duration: u64,
    /// Held across claim and pool-withdrawal payouts.
    payout_guard: CallGuard,
}

impl AccrualEngine {
    /// Create an engine whose index starts at 1.0 and whose first epoch opens now.
    pub fn new(id: AccountId, config: EngineConfig, services: Services) -> AccrueResult<Self> {
        config.validate()?;
        let now = services.clock.now();
        let state = EngineState {
            global: GlobalAccrualState::genesis(now, config.initial_rate),
            positions: HashMap::new(),
            epochs: Vec::new(),
        };
        info!(engine = %id, rate = config.initial_rate, "accrual engine created");
        Ok(Self::assemble(id, state, config.min_epoch_duration, services))
    }

    /// Rebuild an engine from a snapshot taken by [`snapshot`](Self::snapshot).
    ///
    /// The beneficiary gateway is not part of the snapshot and starts unset.
    pub fn from_snapshot(
        id: AccountId,
        snapshot: EngineSnapshot,
        min_epoch_duration: u64,
        services: Services,
    ) -> AccrueResult<Self> {
        if min_epoch_duration == 0 {
            return Err(ValidationError::ZeroEpochDuration.into());
        }
        snapshot.verify()?;
        let state = EngineState {
            global: snapshot.global,
            positions: snapshot.positions.into_iter().collect(),
            epochs: snapshot.epochs,
        };
        info!(engine = %id, accounts = state.positions.len(), "accrual engine restored");
        Ok(Self::assemble(id, state, min_epoch_duration, services))
    }

    fn assemble(id: AccountId, state: EngineState, min_epoch_duration: u64, services: Services) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            gateway: RwLock::new(None),
            services,
            min_epoch_duration,
            payout_guard: CallGuard::new(),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Yield `account` could claim right now. Never mutates state.
    pub fn pending_of(&self, account: &AccountId) -> AccrueResult<u64> {
        let now = self.services.clock.now();
        let st = self.state.lock();
        let Some(pos) = st.positions.get(account) else {
            return Ok(0);
        };
        let index = projected_index(&st.global, now)?;
        Ok(pending(pos, index)?)
    }

    pub fn position_of(&self, account: &AccountId) -> Option<AccountPosition> {
        self.state.lock().positions.get(account).cloned()
    }

    /// Split configuration of `account`; [`Split::NONE`] for unknown accounts.
    pub fn split_of(&self, account: &AccountId) -> Split {
        self.state
            .lock()
            .positions
            .get(account)
            .map(|p| p.split)
            .unwrap_or(Split::NONE)
    }

    pub fn epoch_record(&self, epoch: u64) -> Option<EpochRecord> {
        let st = self.state.lock();
        usize::try_from(epoch).ok().and_then(|i| st.epochs.get(i).copied())
    }

    pub fn epoch_count(&self) -> u64 {
        self.state.lock().global.epoch_counter
    }

    pub fn global_state(&self) -> GlobalAccrualState {
        self.state.lock().global.clone()
    }

    /// Index as of the last accrual.
    pub fn index(&self) -> u128 {
        self.state.lock().global.index
    }

    /// Index as it would be if accrued now.
    pub fn current_index(&self) -> AccrueResult<u128> {
        let now = self.services.clock.now();
        Ok(projected_index(&self.state.lock().global, now)?)
    }

    pub fn rate(&self) -> u64 {
        self.state.lock().global.rate_per_year
    }

    pub fn pool(&self) -> u64 {
        self.state.lock().global.pool
    }

    pub fn total_principal(&self) -> u64 {
        self.state.lock().global.total_principal
    }

    pub fn total_claimed(&self) -> u64 {
        self.state.lock().global.total_claimed
    }

    /// Number of accounts that have ever held a position.
    pub fn account_count(&self) -> usize {
        self.state.lock().positions.len()
    }

    pub fn has_gateway(&self) -> bool {
        self.gateway.read().is_some()
    }

    /// Versioned copy of the full state, positions sorted by account.
    pub fn snapshot(&self) -> EngineSnapshot {
        let st = self.state.lock();
        let mut positions: Vec<(AccountId, AccountPosition)> =
            st.positions.iter().map(|(k, v)| (*k, v.clone())).collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        EngineSnapshot::new(st.global.clone(), positions, st.epochs.clone())
    }

    /// Check the book-wide invariants. Walks every position; diagnostics only.
    pub fn audit(&self) -> Result<(), String> {
        let st = self.state.lock();
        let sum: u128 = st.positions.values().map(|p| p.principal as u128).sum();
        if sum != st.global.total_principal as u128 {
            return Err(format!(
                "total_principal {} != sum of positions {sum}",
                st.global.total_principal
            ));
        }
        for (id, pos) in &st.positions {
            if pos.index_snapshot > st.global.index {
                return Err(format!("{id}: snapshot {} ahead of index {}", pos.index_snapshot, st.global.index));
            }
            if pos.principal == 0 && pos.split != Split::NONE {
                return Err(format!("{id}: split retained at zero principal"));
            }
        }
        Ok(())
    }

    /// Bring the stored index up to now and return it.
    ///
    /// Every mutating call does this itself; calling it separately only
    /// moves `last_update_time` forward and never changes anyone's pending yield.
    pub fn accrue_index(&self) -> AccrueResult<u128> {
        let now = self.services.clock.now();
        let mut st = self.state.lock();
        let mut global = st.global.clone();
        accrue(&mut global, now)?;
        let index = global.index;
        st.global = global;
        Ok(index)
    }

    // ------------------------------------------------------------------
    // Claim
    // ------------------------------------------------------------------

    /// Pay out everything `caller` has earned, split with their beneficiary.
    ///
    /// Bookkeeping (snapshot, settled yield, pool) is committed and the claim
    /// record emitted before the caller's share is pushed and the beneficiary
    /// share is credited. If either payout leg fails, whatever was delivered is
    /// taken back, the full amount is returned to the caller's settled yield
    /// and to the pool, and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`StateError::NothingToClaim`] if nothing is pending
    /// - [`StateError::InsufficientPool`] if the pool cannot cover it
    /// - [`StateError::Reentrancy`] if called from inside another payout
    pub fn claim(&self, caller: &AccountId) -> AccrueResult<ClaimReceipt> {
        let _guard = self.payout_guard.enter("claim")?;
        let Payout { receipt, gateway } = self.commit_claim(caller)?;

        if receipt.to_caller > 0 {
            if let Err(e) = self.services.asset.push(caller, receipt.to_caller) {
                self.reverse_claim(caller, receipt.total, &e.to_string())?;
                return Err(e.into());
            }
        }

        if receipt.to_beneficiary > 0 {
            if let (Some(gateway), Some(beneficiary)) = (gateway, receipt.beneficiary) {
                if let Err(failed) =
                    self.pay_beneficiary(caller, &beneficiary, gateway.as_ref(), receipt.to_beneficiary)
                {
                    self.unwind_claim(caller, &receipt, failed.recovered, &failed.error)?;
                    return Err(failed.error);
                }
            }
        }

        info!(
            caller = %caller,
            total = receipt.total,
            to_caller = receipt.to_caller,
            to_beneficiary = receipt.to_beneficiary,
            "claim paid"
        );
        Ok(receipt)
    }

    fn commit_claim(&self, caller: &AccountId) -> AccrueResult<Payout> {
        let now = self.services.clock.now();
        let mut st = self.state.lock();

        let mut global = st.global.clone();
        accrue(&mut global, now)?;
        let mut pos = st
            .positions
            .get(caller)
            .cloned()
            .unwrap_or_else(|| AccountPosition::new(global.index));

        let amount = pending(&pos, global.index)?;
        if amount == 0 {
            return Err(StateError::NothingToClaim.into());
        }
        if amount > global.pool {
            return Err(StateError::InsufficientPool {
                pool: global.pool,
                need: amount,
            }
            .into());
        }

        pos.accrued = 0;
        pos.index_snapshot = global.index;
        global.pool -= amount;
        global.total_claimed = global
            .total_claimed
            .checked_add(amount)
            .ok_or(MathError::ArithmeticFault)?;

        let gateway = self.gateway.read().clone();
        let (to_caller, to_beneficiary, beneficiary) = match (&gateway, pos.split.beneficiary) {
            (Some(_), Some(b)) if pos.split.share_bps > 0 => {
                let (c, t) = split_amount(amount, pos.split.share_bps)?;
                (c, t, Some(b))
            }
            (None, Some(b)) if pos.split.share_bps > 0 => {
                warn!(
                    caller = %caller,
                    beneficiary = %b,
                    share_bps = pos.split.share_bps,
                    "no beneficiary gateway configured, routing full claim to caller"
                );
                (amount, 0, None)
            }
            _ => (amount, 0, None),
        };

        let receipt = ClaimReceipt {
            total: amount,
            to_caller,
            to_beneficiary,
            beneficiary,
            epoch: global.epoch_counter,
        };

        st.global = global;
        st.positions.insert(*caller, pos);
        let pool_after = st.global.pool;
        drop(st);

        self.services.events.record(&Event::Claimed {
            caller: *caller,
            total: receipt.total,
            to_caller: receipt.to_caller,
            to_beneficiary: receipt.to_beneficiary,
            beneficiary: receipt.beneficiary,
            epoch: receipt.epoch,
            pool_after,
            timestamp: now,
        });
        Ok(Payout { receipt, gateway })
    }

    /// Move the beneficiary share into gateway custody and credit it.
    fn pay_beneficiary(
        &self,
        caller: &AccountId,
        beneficiary: &AccountId,
        gateway: &dyn BeneficiaryGateway,
        amount: u64,
    ) -> Result<(), LegFailure> {
        let custody = gateway.custody_account();
        if let Err(e) = self.services.asset.push(&custody, amount) {
            return Err(LegFailure {
                error: e.into(),
                recovered: amount,
            });
        }
        if let Err(e) = gateway.credit_beneficiary(beneficiary, caller, amount) {
            // Take the share back from the gateway before re-crediting it.
            let recovered = match self.services.asset.pull(&custody, amount) {
                Ok(()) => amount,
                Err(refund) => {
                    error!(
                        caller = %caller,
                        beneficiary = %beneficiary,
                        amount,
                        error = %refund,
                        "gateway rejected credit and refund failed; share left in gateway custody"
                    );
                    0
                }
            };
            return Err(LegFailure {
                error: e.into(),
                recovered,
            });
        }
        Ok(())
    }

    /// Undo a claim whose beneficiary leg failed after the caller was paid.
    ///
    /// The caller's share is pulled back so the whole claim is re-credited and
    /// a retry splits the full amount again. Only value back in engine custody
    /// is re-credited.
    fn unwind_claim(
        &self,
        caller: &AccountId,
        receipt: &ClaimReceipt,
        recovered: u64,
        cause: &AccrueError,
    ) -> AccrueResult<()> {
        let mut back = recovered;
        if receipt.to_caller > 0 {
            match self.services.asset.pull(caller, receipt.to_caller) {
                Ok(()) => back += receipt.to_caller,
                Err(e) => error!(
                    caller = %caller,
                    amount = receipt.to_caller,
                    error = %e,
                    "could not take back caller share of failed claim"
                ),
            }
        }
        if back > 0 {
            self.reverse_claim(caller, back, &cause.to_string())?;
        }
        Ok(())
    }

    /// Put `amount` back into `caller`'s settled yield and the pool.
    fn reverse_claim(&self, caller: &AccountId, amount: u64, reason: &str) -> AccrueResult<()> {
        let now = self.services.clock.now();
        let mut st = self.state.lock();
        let mut global = st.global.clone();
        let mut pos = st
            .positions
            .get(caller)
            .cloned()
            .unwrap_or_else(|| AccountPosition::new(global.index));

        pos.accrued = pos.accrued.checked_add(amount).ok_or(MathError::ArithmeticFault)?;
        global.pool = global.pool.checked_add(amount).ok_or(MathError::ArithmeticFault)?;
        global.total_claimed = global
            .total_claimed
            .checked_sub(amount)
            .ok_or(MathError::ArithmeticFault)?;

        st.global = global;
        st.positions.insert(*caller, pos);
        drop(st);

        warn!(caller = %caller, amount, reason, "claim payout failed, amount re-credited");
        self.services.events.record(&Event::ClaimReverted {
            caller: *caller,
            amount,
            reason: reason.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Epochs
    // ------------------------------------------------------------------

    /// Close the current epoch and append its analytics record.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EpochTooEarly`] before `last_epoch_time + min_epoch_duration`
    pub fn advance_epoch(&self, caller: &AccountId) -> AccrueResult<EpochRecord> {
        self.services.auth.assert_authorized(caller, Role::EpochKeeper)?;
        let now = self.services.clock.now();
        let mut st = self.state.lock();

        let next_allowed = st
            .global
            .last_epoch_time
            .checked_add(self.min_epoch_duration)
            .ok_or(MathError::ArithmeticFault)?;
        if now < next_allowed {
            return Err(ValidationError::EpochTooEarly { next_allowed, now }.into());
        }

        let mut global = st.global.clone();
        accrue(&mut global, now)?;
        let record = EpochRecord {
            accrued_this_epoch: epoch_accrual(
                global.total_principal,
                global.rate_per_year,
                now - global.last_epoch_time,
            )?,
            total_principal_at_snapshot: global.total_principal,
            rate_at_snapshot: global.rate_per_year,
            recorded_at: now,
        };
        let epoch = global.epoch_counter;
        global.epoch_counter = epoch.checked_add(1).ok_or(MathError::ArithmeticFault)?;
        global.last_epoch_time = now;

        st.global = global;
        st.epochs.push(record);
        drop(st);

        info!(epoch, accrued = record.accrued_this_epoch, "epoch advanced");
        self.services.events.record(&Event::EpochAdvanced { epoch, record });
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Admin configuration
    // ------------------------------------------------------------------

    /// Change the annual rate. Time up to now accrues at the old rate.
    pub fn set_rate(&self, caller: &AccountId, new_rate: u64) -> AccrueResult<()> {
        self.services.auth.assert_authorized(caller, Role::Admin)?;
        if new_rate > MAX_RATE_PER_YEAR {
            return Err(ValidationError::RateTooHigh {
                rate: new_rate,
                max: MAX_RATE_PER_YEAR,
            }
            .into());
        }
        let now = self.services.clock.now();
        let mut st = self.state.lock();
        let mut global = st.global.clone();
        accrue(&mut global, now)?;
        let old_rate = global.rate_per_year;
        global.rate_per_year = new_rate;
        let index = global.index;
        st.global = global;
        drop(st);

        info!(old_rate, new_rate, "rate changed");
        self.services.events.record(&Event::RateChanged {
            old_rate,
            new_rate,
            index,
            timestamp: now,
        });
        Ok(())
    }

    /// Install, replace or remove the beneficiary gateway.
    pub fn set_beneficiary_gateway(
        &self,
        caller: &AccountId,
        gateway: Option<Arc<dyn BeneficiaryGateway>>,
    ) -> AccrueResult<()> {
        self.services.auth.assert_authorized(caller, Role::Admin)?;
        let configured = gateway.is_some();
        *self.gateway.write() = gateway;
        info!(configured, "beneficiary gateway changed");
        self.services.events.record(&Event::GatewayChanged {
            configured,
            timestamp: self.services.clock.now(),
        });
        Ok(())
    }

    /// Pull `amount` from `funder` into the reward pool. Open to anyone.
    pub fn fund_pool(&self, funder: &AccountId, amount: u64) -> AccrueResult<u64> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        self.services.asset.pull(funder, amount)?;

        let now = self.services.clock.now();
        let mut st = self.state.lock();
        let Some(pool) = st.global.pool.checked_add(amount) else {
            drop(st);
            self.refund(funder, amount);
            return Err(MathError::ArithmeticFault.into());
        };
        st.global.pool = pool;
        drop(st);

        info!(funder = %funder, amount, pool, "pool funded");
        self.services.events.record(&Event::PoolFunded {
            funder: *funder,
            amount,
            pool,
            timestamp: now,
        });
        Ok(pool)
    }

    /// Send unclaimed pool value to `to`.
    ///
    /// # Errors
    ///
    /// - [`StateError::InsufficientPool`] if `amount` exceeds the pool
    pub fn withdraw_unclaimed_pool(&self, caller: &AccountId, to: &AccountId, amount: u64) -> AccrueResult<u64> {
        self.services.auth.assert_authorized(caller, Role::Admin)?;
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let _guard = self.payout_guard.enter("withdraw_unclaimed_pool")?;

        let now = self.services.clock.now();
        let pool = {
            let mut st = self.state.lock();
            if amount > st.global.pool {
                return Err(StateError::InsufficientPool {
                    pool: st.global.pool,
                    need: amount,
                }
                .into());
            }
            st.global.pool -= amount;
            st.global.pool
        };

        if let Err(e) = self.services.asset.push(to, amount) {
            let mut st = self.state.lock();
            st.global.pool = st
                .global
                .pool
                .checked_add(amount)
                .ok_or(MathError::ArithmeticFault)?;
            return Err(e.into());
        }

        info!(to = %to, amount, pool, "unclaimed pool withdrawn");
        self.services.events.record(&Event::PoolWithdrawn {
            to: *to,
            amount,
            pool,
            timestamp: now,
        });
        Ok(pool)
    }

    fn refund(&self, to: &AccountId, amount: u64) {
        if let Err(e) = self.services.asset.push(to, amount) {
            error!(to = %to, amount, error = %e, "refund failed");
        }
    }

    // ------------------------------------------------------------------
    // Principal changes
    // ------------------------------------------------------------------

    fn apply_increase(&self, account: &AccountId, amount: u64, split: Split) -> AccrueResult<Event> {
        let now = self.services.clock.now();
        let mut st = self.state.lock();

        let mut global = st.global.clone();
        accrue(&mut global, now)?;
        let mut pos = st
            .positions
            .get(account)
            .cloned()
            .unwrap_or_else(|| AccountPosition::new(global.index));

        settle(&mut pos, global.index)?;
        if pos.principal == 0 {
            pos.split = split;
        }
        pos.principal = pos.principal.checked_add(amount).ok_or(MathError::ArithmeticFault)?;
        global.total_principal = global
            .total_principal
            .checked_add(amount)
            .ok_or(MathError::ArithmeticFault)?;

        let event = position_event(account, &pos, &global, now);
        st.global = global;
        st.positions.insert(*account, pos);
        Ok(event)
    }

    fn apply_decrease(&self, account: &AccountId, amount: u64) -> AccrueResult<Event> {
        let now = self.services.clock.now();
        let mut st = self.state.lock();

        let have = st.positions.get(account).map(|p| p.principal).unwrap_or(0);
        if amount > have {
            return Err(StateError::InsufficientBalance { have, need: amount }.into());
        }

        let mut global = st.global.clone();
        accrue(&mut global, now)?;
        let mut pos = st
            .positions
            .get(account)
            .cloned()
            .unwrap_or_else(|| AccountPosition::new(global.index));

        settle(&mut pos, global.index)?;
        pos.principal -= amount;
        if pos.principal == 0 {
            pos.split = Split::NONE;
        }
        global.total_principal = global
            .total_principal
            .checked_sub(amount)
            .ok_or(MathError::ArithmeticFault)?;

        let event = position_event(account, &pos, &global, now);
        st.global = global;
        st.positions.insert(*account, pos);
        Ok(event)
    }
}

fn position_event(account: &AccountId, pos: &AccountPosition, global: &GlobalAccrualState, now: u64) -> Event {
    Event::PositionUpdated {
        account: *account,
        principal: pos.principal,
        accrued: pos.accrued,
        total_principal: global.total_principal,
        index: global.index,
        timestamp: now,
    }
}

impl AccrualNotifier for AccrualEngine {
    fn notify_increase(
        &self,
        caller: &AccountId,
        account: &AccountId,
        amount: u64,
        beneficiary: Option<AccountId>,
        share_bps: u32,
    ) -> AccrueResult<()> {
        self.services.auth.assert_authorized(caller, Role::LedgerNotifier)?;
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let split = Split::new(beneficiary, share_bps)?;
        let event = self.apply_increase(account, amount, split)?;
        debug!(account = %account, amount, "principal increased");
        self.services.events.record(&event);
        Ok(())
    }

    fn notify_decrease(&self, caller: &AccountId, account: &AccountId, amount: u64) -> AccrueResult<()> {
        self.services.auth.assert_authorized(caller, Role::LedgerNotifier)?;
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let event = self.apply_decrease(account, amount)?;
        debug!(account = %account, amount, "principal decreased");
        self.services.events.record(&event);
        Ok(())
    }

    fn split_of(&self, account: &AccountId) -> Split {
        AccrualEngine::split_of(self, account)
    }
}

impl std::fmt::Debug for AccrualEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccrualEngine")
            .field("id", &self.id)
            .field("global", &self.state.lock().global)
            .field("has_gateway", &self.has_gateway())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrue_core::auth::RoleTable;
    use accrue_core::clock::ManualClock;
    use accrue_core::constants::{SECONDS_PER_DAY, SECONDS_PER_YEAR, WAD};
    use accrue_core::error::AuthError;
    use accrue_core::events::MemoryEventSink;
    use accrue_core::memory::{CreditLedger, MemoryVault};
    use accrue_core::traits::Clock;

    const T0: u64 = 1_700_000_000;
    const TEN_PERCENT: u64 = (WAD / 10) as u64;

    struct Fixture {
        engine: AccrualEngine,
        clock: Arc<ManualClock>,
        vault: Arc<MemoryVault>,
        events: Arc<MemoryEventSink>,
        roles: Arc<RoleTable>,
        admin: AccountId,
        ledger: AccountId,
    }

    fn acct(label: &str) -> AccountId {
        AccountId::derive(label)
    }

    fn fixture(rate: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let vault = MemoryVault::new();
        let events = Arc::new(MemoryEventSink::new());
        let admin = acct("admin");
        let ledger = acct("ledger");
        let roles = Arc::new(RoleTable::with_admin(admin));
        roles.grant(ledger, Role::LedgerNotifier);
        let engine_id = acct("engine");
        let services = Services {
            asset: vault.custody(engine_id),
            auth: roles.clone(),
            clock: clock.clone(),
            events: events.clone(),
        };
        let config = EngineConfig {
            initial_rate: rate,
            ..EngineConfig::default()
        };
        let engine = AccrualEngine::new(engine_id, config, services).unwrap();
        Fixture { engine, clock, vault, events, roles, admin, ledger }
    }

    impl Fixture {
        fn fund(&self, amount: u64) {
            let treasury = acct("treasury");
            self.vault.mint(treasury, amount);
            self.engine.fund_pool(&treasury, amount).unwrap();
        }

        fn deposit(&self, who: &AccountId, amount: u64) {
            self.engine.notify_increase(&self.ledger, who, amount, None, 0).unwrap();
        }

        fn with_gateway(&self) -> Arc<CreditLedger> {
            let gw = CreditLedger::new(acct("gateway"));
            self.engine
                .set_beneficiary_gateway(&self.admin, Some(gw.clone()))
                .unwrap();
            gw
        }
    }

    // --- construction ---

    #[test]
    fn new_rejects_excessive_rate() {
        let clock = Arc::new(ManualClock::new(T0));
        let vault = MemoryVault::new();
        let services = Services {
            asset: vault.custody(acct("engine")),
            auth: Arc::new(RoleTable::new()),
            clock,
            events: Arc::new(MemoryEventSink::new()),
        };
        let config = EngineConfig {
            initial_rate: MAX_RATE_PER_YEAR + 1,
            ..EngineConfig::default()
        };
        assert!(AccrualEngine::new(acct("engine"), config, services).is_err());
    }

    #[test]
    fn genesis_index_is_one_wad() {
        let f = fixture(TEN_PERCENT);
        assert_eq!(f.engine.index(), WAD);
        assert_eq!(f.engine.pool(), 0);
        assert_eq!(f.engine.epoch_count(), 0);
    }

    // --- notify ---

    #[test]
    fn notify_requires_ledger_role() {
        let f = fixture(TEN_PERCENT);
        let stranger = acct("stranger");
        let err = f
            .engine
            .notify_increase(&stranger, &acct("alice"), 10, None, 0)
            .unwrap_err();
        assert_eq!(
            err,
            AccrueError::Auth(AuthError::Unauthorized { caller: stranger, role: Role::LedgerNotifier })
        );
        assert_eq!(f.engine.total_principal(), 0);
    }

    #[test]
    fn notify_increase_sets_split_only_from_zero() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        let (b1, b2) = (acct("b1"), acct("b2"));
        f.engine.notify_increase(&f.ledger, &alice, 10, Some(b1), 2_500).unwrap();
        f.engine.notify_increase(&f.ledger, &alice, 10, Some(b2), 9_000).unwrap();
        assert_eq!(f.engine.split_of(&alice), Split { beneficiary: Some(b1), share_bps: 2_500 });
        assert_eq!(f.engine.position_of(&alice).unwrap().principal, 20);
    }

    #[test]
    fn notify_increase_validates_split() {
        let f = fixture(TEN_PERCENT);
        let err = f
            .engine
            .notify_increase(&f.ledger, &acct("alice"), 10, None, 100)
            .unwrap_err();
        assert_eq!(err, AccrueError::Validation(ValidationError::MissingBeneficiary));
    }

    #[test]
    fn notify_decrease_to_zero_clears_split() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.engine.notify_increase(&f.ledger, &alice, 10, Some(acct("b")), 5_000).unwrap();
        f.engine.notify_decrease(&f.ledger, &alice, 10).unwrap();
        let pos = f.engine.position_of(&alice).unwrap();
        assert_eq!(pos.principal, 0);
        assert_eq!(pos.split, Split::NONE);
        assert_eq!(f.engine.total_principal(), 0);
    }

    #[test]
    fn notify_decrease_beyond_principal_fails() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.deposit(&alice, 10);
        let err = f.engine.notify_decrease(&f.ledger, &alice, 11).unwrap_err();
        assert_eq!(err, AccrueError::State(StateError::InsufficientBalance { have: 10, need: 11 }));
    }

    #[test]
    fn yield_survives_principal_changes() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        f.deposit(&alice, 1_000);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
        f.clock.advance(SECONDS_PER_YEAR);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 300);
        f.engine.notify_decrease(&f.ledger, &alice, 2_000).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 300);
    }

    // --- pending_of ---

    #[test]
    fn pending_is_view_only() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.deposit(&alice, 1_000);
        let before = f.engine.global_state();
        f.clock.advance(SECONDS_PER_YEAR);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
        assert_eq!(f.engine.global_state(), before);
    }

    #[test]
    fn explicit_accrual_matches_projection() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        let projected = f.engine.current_index().unwrap();
        assert_eq!(f.engine.accrue_index().unwrap(), projected);
        assert_eq!(f.engine.index(), WAD + WAD / 10);
        assert_eq!(f.engine.global_state().last_update_time, f.clock.now());
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
    }

    #[test]
    fn pending_of_unknown_is_zero() {
        let f = fixture(TEN_PERCENT);
        assert_eq!(f.engine.pending_of(&acct("nobody")).unwrap(), 0);
    }

    // --- claim ---

    #[test]
    fn claim_pays_caller_and_drains_pending() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(1_000);
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);

        let receipt = f.engine.claim(&alice).unwrap();
        assert_eq!(receipt.total, 100);
        assert_eq!(receipt.to_caller, 100);
        assert_eq!(receipt.to_beneficiary, 0);
        assert_eq!(f.vault.balance_of(&alice), 100);
        assert_eq!(f.engine.pool(), 900);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 0);
        assert_eq!(f.engine.total_claimed(), 100);
    }

    #[test]
    fn claim_twice_without_time_is_nothing() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(1_000);
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_DAY);
        f.engine.claim(&alice).unwrap();
        assert_eq!(f.engine.claim(&alice).unwrap_err(), AccrueError::State(StateError::NothingToClaim));
    }

    #[test]
    fn claim_beyond_pool_changes_nothing() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(50);
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        let before = f.engine.snapshot();
        let err = f.engine.claim(&alice).unwrap_err();
        assert_eq!(err, AccrueError::State(StateError::InsufficientPool { pool: 50, need: 100 }));
        assert_eq!(f.engine.snapshot(), before);
    }

    #[test]
    fn claim_splits_with_gateway() {
        let f = fixture(TEN_PERCENT);
        let gw = f.with_gateway();
        let (alice, charity) = (acct("alice"), acct("charity"));
        f.fund(1_000);
        f.engine.notify_increase(&f.ledger, &alice, 1_000, Some(charity), 5_000).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);

        let r = f.engine.claim(&alice).unwrap();
        assert_eq!((r.to_caller, r.to_beneficiary), (50, 50));
        assert_eq!(r.beneficiary, Some(charity));
        assert_eq!(gw.credited_by(&charity, &alice), 50);
        assert_eq!(f.vault.balance_of(&acct("gateway")), 50);
        assert_eq!(f.vault.balance_of(&alice), 50);
    }

    #[test]
    fn claim_without_gateway_routes_all_to_caller() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(1_000);
        f.engine.notify_increase(&f.ledger, &alice, 1_000, Some(acct("charity")), 5_000).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);
        let r = f.engine.claim(&alice).unwrap();
        assert_eq!((r.to_caller, r.to_beneficiary, r.beneficiary), (100, 0, None));
    }

    #[test]
    fn failed_caller_push_recredits_everything() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(1_000);
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        f.vault.freeze(alice);

        let err = f.engine.claim(&alice).unwrap_err();
        assert!(matches!(err, AccrueError::Transfer(_)));
        assert_eq!(f.engine.pool(), 1_000);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
        assert_eq!(f.engine.total_claimed(), 0);

        f.vault.thaw(&alice);
        assert_eq!(f.engine.claim(&alice).unwrap().total, 100);
    }

    #[test]
    fn rejected_credit_aborts_whole_claim() {
        let f = fixture(TEN_PERCENT);
        let gw = f.with_gateway();
        let (alice, charity) = (acct("alice"), acct("charity"));
        gw.reject(charity);
        f.fund(1_000);
        f.engine.notify_increase(&f.ledger, &alice, 1_000, Some(charity), 5_000).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);

        let err = f.engine.claim(&alice).unwrap_err();
        assert!(matches!(err, AccrueError::Gateway(_)));
        assert_eq!(f.vault.balance_of(&alice), 0);
        assert_eq!(f.vault.balance_of(&acct("gateway")), 0);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
        assert_eq!(f.engine.pool(), 1_000);
        assert_eq!(f.engine.total_claimed(), 0);
        assert_eq!(f.vault.balance_of(&f.engine.id()), 1_000);
    }

    #[test]
    fn retry_after_rejected_credit_keeps_split() {
        let f = fixture(TEN_PERCENT);
        let rejecting = f.with_gateway();
        let (alice, charity) = (acct("alice"), acct("charity"));
        rejecting.reject(charity);
        f.fund(1_000);
        f.engine.notify_increase(&f.ledger, &alice, 1_000, Some(charity), 5_000).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);
        assert!(f.engine.claim(&alice).is_err());

        let gw = f.with_gateway();
        let r = f.engine.claim(&alice).unwrap();
        assert_eq!((r.total, r.to_caller, r.to_beneficiary), (100, 50, 50));
        assert_eq!(f.vault.balance_of(&alice), 50);
        assert_eq!(gw.credited_by(&charity, &alice), 50);
        assert_eq!(f.engine.pool(), 900);
    }

    #[test]
    fn failed_custody_push_aborts_whole_claim() {
        let f = fixture(TEN_PERCENT);
        f.with_gateway();
        let (alice, charity) = (acct("alice"), acct("charity"));
        f.fund(1_000);
        f.engine.notify_increase(&f.ledger, &alice, 1_000, Some(charity), 5_000).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);
        f.vault.freeze(acct("gateway"));

        assert!(matches!(f.engine.claim(&alice), Err(AccrueError::Transfer(_))));
        assert_eq!(f.vault.balance_of(&alice), 0);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
        assert_eq!(f.engine.pool(), 1_000);
    }

    #[test]
    fn claim_record_emitted() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(1_000);
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        f.events.drain();
        f.engine.claim(&alice).unwrap();
        let events = f.events.events();
        assert!(matches!(
            events.as_slice(),
            [Event::Claimed { total: 100, pool_after: 900, epoch: 0, .. }]
        ));
    }

    // --- epochs ---

    #[test]
    fn epoch_too_early_rejected() {
        let f = fixture(TEN_PERCENT);
        f.clock.advance(SECONDS_PER_DAY - 1);
        let err = f.engine.advance_epoch(&f.admin).unwrap_err();
        assert_eq!(
            err,
            AccrueError::Validation(ValidationError::EpochTooEarly {
                next_allowed: T0 + SECONDS_PER_DAY,
                now: T0 + SECONDS_PER_DAY - 1
            })
        );
    }

    #[test]
    fn epoch_records_notional_accrual() {
        let f = fixture(TEN_PERCENT);
        f.deposit(&acct("alice"), 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        let rec = f.engine.advance_epoch(&f.admin).unwrap();
        assert_eq!(rec.accrued_this_epoch, 100);
        assert_eq!(rec.total_principal_at_snapshot, 1_000);
        assert_eq!(rec.rate_at_snapshot, TEN_PERCENT);
        assert_eq!(rec.recorded_at, f.clock.now());
        assert_eq!(f.engine.epoch_count(), 1);
        assert_eq!(f.engine.epoch_record(0), Some(rec));
        assert_eq!(f.engine.epoch_record(1), None);
    }

    #[test]
    fn epoch_requires_keeper() {
        let f = fixture(TEN_PERCENT);
        f.clock.advance(SECONDS_PER_DAY);
        assert!(matches!(f.engine.advance_epoch(&acct("alice")), Err(AccrueError::Auth(_))));
        let keeper = acct("keeper");
        f.roles.grant(keeper, Role::EpochKeeper);
        assert!(f.engine.advance_epoch(&keeper).is_ok());
    }

    #[test]
    fn empty_epoch_accrues_nothing() {
        let f = fixture(TEN_PERCENT);
        f.clock.advance(SECONDS_PER_DAY);
        assert_eq!(f.engine.advance_epoch(&f.admin).unwrap().accrued_this_epoch, 0);
    }

    // --- admin ---

    #[test]
    fn set_rate_is_not_retroactive() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        f.engine.set_rate(&f.admin, 0).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);
        assert_eq!(f.engine.pending_of(&alice).unwrap(), 100);
    }

    #[test]
    fn set_rate_bounds_and_auth() {
        let f = fixture(TEN_PERCENT);
        assert!(matches!(
            f.engine.set_rate(&f.admin, MAX_RATE_PER_YEAR + 1),
            Err(AccrueError::Validation(ValidationError::RateTooHigh { .. }))
        ));
        assert!(matches!(f.engine.set_rate(&acct("alice"), 0), Err(AccrueError::Auth(_))));
        assert_eq!(f.engine.rate(), TEN_PERCENT);
    }

    #[test]
    fn fund_pool_rejects_zero_and_failed_pull() {
        let f = fixture(TEN_PERCENT);
        let poor = acct("poor");
        assert_eq!(
            f.engine.fund_pool(&poor, 0).unwrap_err(),
            AccrueError::Validation(ValidationError::ZeroAmount)
        );
        assert!(matches!(f.engine.fund_pool(&poor, 5), Err(AccrueError::Transfer(_))));
        assert_eq!(f.engine.pool(), 0);
    }

    #[test]
    fn withdraw_unclaimed_pool_bounds() {
        let f = fixture(TEN_PERCENT);
        let dest = acct("dest");
        f.fund(100);
        assert!(matches!(
            f.engine.withdraw_unclaimed_pool(&f.admin, &dest, 101),
            Err(AccrueError::State(StateError::InsufficientPool { pool: 100, need: 101 }))
        ));
        assert!(matches!(f.engine.withdraw_unclaimed_pool(&dest, &dest, 1), Err(AccrueError::Auth(_))));
        assert_eq!(f.engine.withdraw_unclaimed_pool(&f.admin, &dest, 40).unwrap(), 60);
        assert_eq!(f.vault.balance_of(&dest), 40);
    }

    #[test]
    fn withdraw_unclaimed_pool_restores_on_failed_push() {
        let f = fixture(TEN_PERCENT);
        let dest = acct("dest");
        f.fund(100);
        f.vault.freeze(dest);
        assert!(f.engine.withdraw_unclaimed_pool(&f.admin, &dest, 40).is_err());
        assert_eq!(f.engine.pool(), 100);
    }

    #[test]
    fn gateway_change_requires_admin() {
        let f = fixture(TEN_PERCENT);
        let gw: Arc<dyn BeneficiaryGateway> = CreditLedger::new(acct("gateway"));
        assert!(f.engine.set_beneficiary_gateway(&acct("alice"), Some(gw.clone())).is_err());
        assert!(!f.engine.has_gateway());
        f.engine.set_beneficiary_gateway(&f.admin, Some(gw)).unwrap();
        assert!(f.engine.has_gateway());
        f.engine.set_beneficiary_gateway(&f.admin, None).unwrap();
        assert!(!f.engine.has_gateway());
    }

    // --- invariants ---

    #[test]
    fn audit_passes_after_mixed_activity() {
        let f = fixture(TEN_PERCENT);
        f.fund(10_000);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            f.deposit(&acct(name), 100 * (i as u64 + 1));
            f.clock.advance(SECONDS_PER_DAY);
        }
        f.engine.notify_decrease(&f.ledger, &acct("b"), 200).unwrap();
        f.clock.advance(SECONDS_PER_DAY);
        f.engine.claim(&acct("a")).unwrap();
        assert!(f.engine.audit().is_ok());
        assert_eq!(f.engine.total_principal(), 400);
        assert_eq!(f.engine.account_count(), 3);
    }

    // --- snapshot ---

    #[test]
    fn restore_from_snapshot_keeps_pending() {
        let f = fixture(TEN_PERCENT);
        let alice = acct("alice");
        f.fund(1_000);
        f.deposit(&alice, 1_000);
        f.clock.advance(SECONDS_PER_YEAR);
        f.deposit(&alice, 1);
        let bytes = f.engine.snapshot().encode().unwrap();

        let services = Services {
            asset: f.vault.custody(f.engine.id()),
            auth: f.roles.clone(),
            clock: f.clock.clone(),
            events: f.events.clone(),
        };
        let restored = AccrualEngine::from_snapshot(
            f.engine.id(),
            EngineSnapshot::decode(&bytes).unwrap(),
            SECONDS_PER_DAY,
            services,
        )
        .unwrap();
        assert_eq!(restored.pending_of(&alice).unwrap(), 100);
        assert_eq!(restored.pool(), 1_000);
        assert!(!restored.has_gateway());
        assert_eq!(restored.claim(&alice).unwrap().total, 100);
    }

    #[test]
    fn restore_rejects_zero_epoch_duration() {
        let f = fixture(TEN_PERCENT);
        let services = Services {
            asset: f.vault.custody(f.engine.id()),
            auth: f.roles.clone(),
            clock: f.clock.clone(),
            events: f.events.clone(),
        };
        let err = AccrualEngine::from_snapshot(f.engine.id(), f.engine.snapshot(), 0, services).unwrap_err();
        assert_eq!(err, AccrueError::Validation(ValidationError::ZeroEpochDuration));
    }
}
