//! Shared wiring for the integration tests.

use std::sync::Arc;

use parking_lot::Mutex;

use accrue_core::auth::RoleTable;
use accrue_core::clock::ManualClock;
use accrue_core::constants::{SECONDS_PER_DAY, WAD};
use accrue_core::error::{AccrueResult, TransferError};
use accrue_core::events::MemoryEventSink;
use accrue_core::memory::{CreditLedger, MemoryVault};
use accrue_core::traits::{AssetTransfer, BeneficiaryGateway, Services};
use accrue_core::types::{AccountId, ClaimReceipt, Role};
use accrue_engine::{AccrualEngine, EngineConfig};
use accrue_ledger::{LedgerConfig, ParticipantLedger};

/// Harness start time.
pub const T0: u64 = 1_700_000_000;

/// 10% per year, WAD-scaled.
pub const TEN_PERCENT: u64 = (WAD / 10) as u64;

/// Identity from a seed byte.
pub fn acct(seed: u8) -> AccountId {
    AccountId([seed; 32])
}

type PushHook = Box<dyn Fn(&AccountId, u64) + Send + Sync>;

/// [`AssetTransfer`] that delegates to an inner handle and runs a hook
/// before every push, so tests can call back into the component mid-payout.
pub struct HookedTransfer {
    inner: Arc<dyn AssetTransfer>,
    before_push: Mutex<Option<Arc<PushHook>>>,
}

impl HookedTransfer {
    pub fn new(inner: Arc<dyn AssetTransfer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            before_push: Mutex::new(None),
        })
    }

    pub fn before_push(&self, hook: impl Fn(&AccountId, u64) + Send + Sync + 'static) {
        *self.before_push.lock() = Some(Arc::new(Box::new(hook)));
    }

    pub fn clear(&self) {
        *self.before_push.lock() = None;
    }
}

impl AssetTransfer for HookedTransfer {
    fn pull(&self, from: &AccountId, amount: u64) -> Result<(), TransferError> {
        self.inner.pull(from, amount)
    }

    fn push(&self, to: &AccountId, amount: u64) -> Result<(), TransferError> {
        // Release the lock before running the hook; it may push again.
        let hook = self.before_push.lock().clone();
        if let Some(hook) = hook {
            hook(to, amount);
        }
        self.inner.push(to, amount)
    }
}

/// Ledger, engine and gateway over one vault and one manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub vault: Arc<MemoryVault>,
    pub roles: Arc<RoleTable>,
    pub events: Arc<MemoryEventSink>,
    pub engine: Arc<AccrualEngine>,
    pub ledger: Arc<ParticipantLedger>,
    pub gateway: Arc<CreditLedger>,
    /// Transfer handle the engine pays out through.
    pub engine_asset: Arc<HookedTransfer>,
    /// Transfer handle the ledger returns principal through.
    pub ledger_asset: Arc<HookedTransfer>,
    pub admin: AccountId,
    pub treasury: AccountId,
}

impl Harness {
    /// Engine at `rate` (WAD), one-week lock, gateway installed.
    pub fn new(rate: u64) -> Self {
        Self::build(rate, LedgerConfig::default(), true)
    }

    /// As [`new`](Self::new) but with no beneficiary gateway.
    pub fn without_gateway(rate: u64) -> Self {
        Self::build(rate, LedgerConfig::default(), false)
    }

    /// As [`new`](Self::new) with no withdrawal lock.
    pub fn unlocked(rate: u64) -> Self {
        Self::build(rate, LedgerConfig { lock_period: 0 }, true)
    }

    fn build(rate: u64, ledger_config: LedgerConfig, with_gateway: bool) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let vault = MemoryVault::new();
        let events = Arc::new(MemoryEventSink::new());
        let admin = AccountId::derive("admin");
        let treasury = AccountId::derive("treasury");
        let engine_id = AccountId::derive("engine");
        let ledger_id = AccountId::derive("ledger");

        let roles = Arc::new(RoleTable::with_admin(admin));
        roles.grant(ledger_id, Role::LedgerNotifier);

        let engine_asset = HookedTransfer::new(vault.custody(engine_id));
        let ledger_asset = HookedTransfer::new(vault.custody(ledger_id));

        let engine = Arc::new(
            AccrualEngine::new(
                engine_id,
                EngineConfig {
                    initial_rate: rate,
                    min_epoch_duration: SECONDS_PER_DAY,
                },
                Services {
                    asset: engine_asset.clone(),
                    auth: roles.clone(),
                    clock: clock.clone(),
                    events: events.clone(),
                },
            )
            .expect("engine"),
        );
        let ledger = Arc::new(
            ParticipantLedger::new(
                ledger_id,
                ledger_config,
                Services {
                    asset: ledger_asset.clone(),
                    auth: roles.clone(),
                    clock: clock.clone(),
                    events: events.clone(),
                },
            )
            .expect("ledger"),
        );
        ledger.set_accrual_engine(&admin, engine.clone()).expect("wire engine");

        let gateway = CreditLedger::new(AccountId::derive("gateway"));
        if with_gateway {
            engine
                .set_beneficiary_gateway(&admin, Some(gateway.clone() as Arc<dyn BeneficiaryGateway>))
                .expect("wire gateway");
        }

        Self {
            clock,
            vault,
            roles,
            events,
            engine,
            ledger,
            gateway,
            engine_asset,
            ledger_asset,
            admin,
            treasury,
        }
    }

    /// Mint `amount` to the treasury and move it into the reward pool.
    pub fn fund(&self, amount: u64) {
        self.vault.mint(self.treasury, amount);
        self.engine.fund_pool(&self.treasury, amount).expect("fund pool");
    }

    /// Mint `amount` to `who` and deposit it with no beneficiary.
    pub fn deposit(&self, who: AccountId, amount: u64) -> AccrueResult<u64> {
        self.vault.mint(who, amount);
        self.ledger.deposit(&who, amount, None, 0)
    }

    /// Mint `amount` to `who` and deposit it with a split.
    pub fn deposit_split(&self, who: AccountId, amount: u64, beneficiary: AccountId, share_bps: u32) -> AccrueResult<u64> {
        self.vault.mint(who, amount);
        self.ledger.deposit(&who, amount, Some(beneficiary), share_bps)
    }

    pub fn advance(&self, secs: u64) -> u64 {
        self.clock.advance(secs)
    }

    pub fn claim(&self, who: AccountId) -> AccrueResult<ClaimReceipt> {
        self.engine.claim(&who)
    }

    pub fn pending(&self, who: AccountId) -> u64 {
        self.engine.pending_of(&who).expect("pending")
    }

    /// Ledger and engine agree, and the engine's book is consistent.
    pub fn assert_consistent(&self) {
        assert_eq!(self.ledger.total_principal(), self.engine.total_principal());
        if let Err(problem) = self.engine.audit() {
            panic!("engine audit failed: {problem}");
        }
    }
}
