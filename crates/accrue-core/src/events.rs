//! Structured records emitted by every mutating operation.
//!
//! Records carry the actor, amounts, resulting balances and a timestamp so an
//! off-process indexer can rebuild history. They are delivered to an
//! [`EventSink`]; the core never reads them back.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::traits::EventSink;
use crate::types::{AccountId, EpochRecord};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Deposited {
        participant: AccountId,
        amount: u64,
        new_balance: u64,
        lock_expiry: u64,
        total_principal: u64,
        timestamp: u64,
    },
    Withdrawn {
        participant: AccountId,
        amount: u64,
        new_balance: u64,
        total_principal: u64,
        timestamp: u64,
    },
    PositionUpdated {
        account: AccountId,
        principal: u64,
        accrued: u64,
        total_principal: u64,
        index: u128,
        timestamp: u64,
    },
    Claimed {
        caller: AccountId,
        total: u64,
        to_caller: u64,
        to_beneficiary: u64,
        beneficiary: Option<AccountId>,
        epoch: u64,
        pool_after: u64,
        timestamp: u64,
    },
    /// A claim whose payout failed; `amount` went back to the account and pool.
    ClaimReverted {
        caller: AccountId,
        amount: u64,
        reason: String,
        timestamp: u64,
    },
    PoolFunded {
        funder: AccountId,
        amount: u64,
        pool: u64,
        timestamp: u64,
    },
    PoolWithdrawn {
        to: AccountId,
        amount: u64,
        pool: u64,
        timestamp: u64,
    },
    RateChanged {
        old_rate: u64,
        new_rate: u64,
        index: u128,
        timestamp: u64,
    },
    EpochAdvanced {
        epoch: u64,
        record: EpochRecord,
    },
    GatewayChanged {
        configured: bool,
        timestamp: u64,
    },
    LockPeriodChanged {
        old_period: u64,
        new_period: u64,
        timestamp: u64,
    },
    EngineChanged {
        timestamp: u64,
    },
}

impl Event {
    /// The `type` tag used in serialized form.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Deposited { .. } => "deposited",
            Event::Withdrawn { .. } => "withdrawn",
            Event::PositionUpdated { .. } => "position_updated",
            Event::Claimed { .. } => "claimed",
            Event::ClaimReverted { .. } => "claim_reverted",
            Event::PoolFunded { .. } => "pool_funded",
            Event::PoolWithdrawn { .. } => "pool_withdrawn",
            Event::RateChanged { .. } => "rate_changed",
            Event::EpochAdvanced { .. } => "epoch_advanced",
            Event::GatewayChanged { .. } => "gateway_changed",
            Event::LockPeriodChanged { .. } => "lock_period_changed",
            Event::EngineChanged { .. } => "engine_changed",
        }
    }

    /// Serialize as a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"type\":\"{}\",\"error\":\"{e}\"}}", self.name()))
    }
}

/// Collects records in memory. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Emits each record as a `tracing` event under the `accrue::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: &Event) {
        info!(target: "accrue::events", kind = event.name(), payload = %event.to_json());
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _event: &Event) {}
}

/// Forwards every record to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutEventSink {
    fn record(&self, event: &Event) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
