//! Scripted scenarios.
//!
//! A script is a JSON document with an optional start time and a list of
//! steps. Accounts are named by label; each label maps to
//! `AccountId::derive(label)`. Every record emitted while a step runs is
//! written as one JSON line, followed by the step's own result line.

use std::io::Write;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use accrue_core::clock::ManualClock;
use accrue_core::constants::rate_from_bps;
use accrue_core::error::AccrueError;
use accrue_core::types::AccountId;
use accrue_node::{AccrueSystem, Summary};

/// Clock start used when a script does not set one (2024-01-01T00:00:00Z).
pub const DEFAULT_START: u64 = 1_704_067_200;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Script {
    #[serde(default = "default_start")]
    pub start: u64,
    pub steps: Vec<Step>,
}

fn default_start() -> u64 {
    DEFAULT_START
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Credit `to` with fresh units in the vault.
    Mint { to: String, amount: u64 },
    Fund { from: String, amount: u64 },
    Deposit {
        participant: String,
        amount: u64,
        #[serde(default)]
        beneficiary: Option<String>,
        #[serde(default)]
        share_bps: u32,
    },
    Withdraw { participant: String, amount: u64 },
    Claim { caller: String },
    AdvanceTime { seconds: u64 },
    /// Exactly one of `rate` (WAD) or `bps`.
    SetRate {
        #[serde(default)]
        rate: Option<u64>,
        #[serde(default)]
        bps: Option<u64>,
    },
    AdvanceEpoch,
    WithdrawPool { to: String, amount: u64 },
    Query {
        #[serde(default)]
        account: Option<String>,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Mint { .. } => "mint",
            Step::Fund { .. } => "fund",
            Step::Deposit { .. } => "deposit",
            Step::Withdraw { .. } => "withdraw",
            Step::Claim { .. } => "claim",
            Step::AdvanceTime { .. } => "advance_time",
            Step::SetRate { .. } => "set_rate",
            Step::AdvanceEpoch => "advance_epoch",
            Step::WithdrawPool { .. } => "withdraw_pool",
            Step::Query { .. } => "query",
        }
    }
}

#[derive(Debug, Serialize)]
struct AccountView {
    account: AccountId,
    principal: u64,
    lock_expiry: u64,
    pending: u64,
    beneficiary: Option<AccountId>,
    share_bps: u32,
    vault_balance: u64,
}

/// Outcome counts for a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub steps: usize,
    pub failed: usize,
}

fn id(label: &str) -> AccountId {
    AccountId::derive(label)
}

pub fn parse(text: &str) -> Result<Script> {
    serde_json::from_str(text).context("invalid script")
}

/// Execute `script` against `system`, driving `clock`.
///
/// A failing step is reported as an `error` line. With `strict`, the run
/// stops there and returns an error; otherwise it carries on.
pub fn run(
    system: &AccrueSystem,
    clock: &ManualClock,
    script: &Script,
    strict: bool,
    out: &mut impl Write,
) -> Result<RunStats> {
    clock.set(script.start);
    let mut stats = RunStats::default();

    for (i, step) in script.steps.iter().enumerate() {
        stats.steps += 1;
        let result = execute(system, clock, step);

        for record in system.records.drain() {
            writeln!(out, "{}", record.to_json())?;
        }

        match result {
            Ok(value) => writeln!(out, "{}", json!({ "type": "step", "step": i, "op": step.name(), "result": value }))?,
            Err(e) => {
                stats.failed += 1;
                let kind = match e.downcast_ref::<AccrueError>() {
                    Some(err) => format!("{:?}", err.kind()),
                    None => "Script".to_string(),
                };
                writeln!(
                    out,
                    "{}",
                    json!({ "type": "error", "step": i, "op": step.name(), "kind": kind, "message": e.to_string() })
                )?;
                if strict {
                    bail!("step {i} ({}) failed: {e}", step.name());
                }
            }
        }
    }
    Ok(stats)
}

fn execute(system: &AccrueSystem, clock: &ManualClock, step: &Step) -> Result<serde_json::Value> {
    let admin = system.admin;
    let value = match step {
        Step::Mint { to, amount } => {
            system.vault.mint(id(to), *amount);
            json!({ "balance": system.vault.balance_of(&id(to)) })
        }
        Step::Fund { from, amount } => json!({ "pool": system.engine.fund_pool(&id(from), *amount)? }),
        Step::Deposit {
            participant,
            amount,
            beneficiary,
            share_bps,
        } => {
            let balance = system.ledger.deposit(
                &id(participant),
                *amount,
                beneficiary.as_deref().map(id),
                *share_bps,
            )?;
            json!({ "balance": balance })
        }
        Step::Withdraw { participant, amount } => {
            json!({ "balance": system.ledger.withdraw(&id(participant), *amount)? })
        }
        Step::Claim { caller } => serde_json::to_value(system.engine.claim(&id(caller))?)?,
        Step::AdvanceTime { seconds } => json!({ "now": clock.advance(*seconds) }),
        Step::SetRate { rate, bps } => {
            let rate = match (rate, bps) {
                (Some(r), None) => *r,
                (None, Some(b)) => rate_from_bps(*b).with_context(|| format!("bps {b} out of range"))?,
                _ => bail!("set_rate needs exactly one of `rate` or `bps`"),
            };
            system.engine.set_rate(&admin, rate)?;
            json!({ "rate": rate })
        }
        Step::AdvanceEpoch => serde_json::to_value(system.engine.advance_epoch(&admin)?)?,
        Step::WithdrawPool { to, amount } => {
            json!({ "pool": system.engine.withdraw_unclaimed_pool(&admin, &id(to), *amount)? })
        }
        Step::Query { account } => match account {
            Some(label) => serde_json::to_value(view(system, &id(label))?)?,
            None => serde_json::to_value::<Summary>(system.summary())?,
        },
    };
    Ok(value)
}

fn view(system: &AccrueSystem, account: &AccountId) -> Result<AccountView> {
    let entry = system.ledger.entry_of(account);
    let split = system.engine.split_of(account);
    Ok(AccountView {
        account: *account,
        principal: entry.principal,
        lock_expiry: entry.lock_expiry,
        pending: system.engine.pending_of(account)?,
        beneficiary: split.beneficiary,
        share_bps: split.share_bps,
        vault_balance: system.vault.balance_of(account),
    })
}
