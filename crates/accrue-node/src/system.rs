//! In-process composition of every Accrue subsystem.
//!
//! [`AccrueSystem`] owns one [`MemoryVault`], one [`RoleTable`], the engine,
//! the ledger and (optionally) a [`CreditLedger`] gateway, all reading the same
//! clock. Records go both to an in-memory sink and to `tracing`.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use accrue_core::auth::RoleTable;
use accrue_core::error::AccrueResult;
use accrue_core::events::{FanoutEventSink, MemoryEventSink, TracingEventSink};
use accrue_core::memory::{CreditLedger, MemoryVault};
use accrue_core::traits::{BeneficiaryGateway, Clock, EventSink, Services};
use accrue_core::types::{AccountId, Role};
use accrue_engine::AccrualEngine;
use accrue_ledger::ParticipantLedger;

use crate::config::AccrueConfig;

/// Custody identity of the engine's reward pool.
pub const ENGINE_LABEL: &str = "accrue/engine";
/// Custody identity of the participant ledger.
pub const LEDGER_LABEL: &str = "accrue/ledger";
/// Custody identity of the beneficiary gateway.
pub const GATEWAY_LABEL: &str = "accrue/gateway";

/// Point-in-time totals for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub timestamp: u64,
    pub index: u128,
    pub rate_per_year: u64,
    pub pool: u64,
    pub total_principal: u64,
    pub total_claimed: u64,
    pub epoch_count: u64,
    pub accounts: usize,
}

pub struct AccrueSystem {
    pub clock: Arc<dyn Clock>,
    pub vault: Arc<MemoryVault>,
    pub roles: Arc<RoleTable>,
    pub records: Arc<MemoryEventSink>,
    pub engine: Arc<AccrualEngine>,
    pub ledger: Arc<ParticipantLedger>,
    pub gateway: Option<Arc<CreditLedger>>,
    pub admin: AccountId,
}

impl AccrueSystem {
    /// Build and wire a system from `config` on `clock`.
    ///
    /// The ledger receives [`Role::LedgerNotifier`]; the admin identity
    /// receives [`Role::Admin`] and [`Role::EpochKeeper`].
    pub fn build(config: &AccrueConfig, clock: Arc<dyn Clock>) -> AccrueResult<Self> {
        config.validate()?;
        let admin = AccountId::derive(&config.admin);
        let engine_id = AccountId::derive(ENGINE_LABEL);
        let ledger_id = AccountId::derive(LEDGER_LABEL);

        let vault = MemoryVault::new();
        let roles = Arc::new(RoleTable::with_admin(admin));
        roles.grant(ledger_id, Role::LedgerNotifier);

        let records = Arc::new(MemoryEventSink::new());
        let events: Arc<dyn EventSink> = Arc::new(FanoutEventSink::new(vec![
            records.clone() as Arc<dyn EventSink>,
            Arc::new(TracingEventSink),
        ]));

        let services = |custody: AccountId| Services {
            asset: vault.custody(custody),
            auth: roles.clone(),
            clock: clock.clone(),
            events: events.clone(),
        };

        let engine = Arc::new(AccrualEngine::new(
            engine_id,
            config.engine.clone(),
            services(engine_id),
        )?);
        let ledger = Arc::new(ParticipantLedger::new(
            ledger_id,
            config.ledger.clone(),
            services(ledger_id),
        )?);
        ledger.set_accrual_engine(&admin, engine.clone())?;

        let gateway = if config.gateway {
            let gw = CreditLedger::new(AccountId::derive(GATEWAY_LABEL));
            engine.set_beneficiary_gateway(&admin, Some(gw.clone() as Arc<dyn BeneficiaryGateway>))?;
            Some(gw)
        } else {
            None
        };

        info!(
            admin = %admin,
            rate = config.engine.initial_rate,
            lock_period = config.ledger.lock_period,
            gateway = config.gateway,
            "accrue system ready"
        );

        Ok(Self {
            clock,
            vault,
            roles,
            records,
            engine,
            ledger,
            gateway,
            admin,
        })
    }

    pub fn summary(&self) -> Summary {
        let global = self.engine.global_state();
        Summary {
            timestamp: self.clock.now(),
            index: global.index,
            rate_per_year: global.rate_per_year,
            pool: global.pool,
            total_principal: global.total_principal,
            total_claimed: global.total_claimed,
            epoch_count: global.epoch_counter,
            accounts: self.engine.account_count(),
        }
    }

    /// Whether ledger and engine agree on total principal and the engine's
    /// own book is consistent.
    pub fn check_consistency(&self) -> Result<(), String> {
        let (ledger, engine) = (self.ledger.total_principal(), self.engine.total_principal());
        if ledger != engine {
            return Err(format!("ledger total {ledger} != engine total {engine}"));
        }
        self.engine.audit()
    }
}
