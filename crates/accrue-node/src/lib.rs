//! # accrue-node: In-process composition for Accrue.
//!
//! Wires the accrual subsystems into one runnable unit:
//! - [`config::AccrueConfig`]: layered configuration (defaults, TOML file, `ACCRUE__*` env)
//! - [`system::AccrueSystem`]: vault, role table, engine, ledger and gateway on one clock

pub mod config;
pub mod system;

pub use config::{AccrueConfig, ConfigError, LogFormat};
pub use system::{AccrueSystem, Summary};
