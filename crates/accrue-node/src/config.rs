//! Layered configuration for an Accrue system.
//!
//! Sources, later ones winning: built-in defaults, an optional TOML file, then
//! `ACCRUE__*` environment variables (`__` separates nesting, so
//! `ACCRUE__ENGINE__INITIAL_RATE_BPS=500` sets `engine.initial_rate_bps`).

use std::fmt;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use accrue_core::error::ValidationError;
use accrue_engine::EngineConfig;
use accrue_ledger::LedgerConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ACCRUE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
    #[error("engine.initial_rate and engine.initial_rate_bps are mutually exclusive")]
    ConflictingRate,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

/// Effective configuration for an [`AccrueSystem`](crate::system::AccrueSystem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccrueConfig {
    pub engine: EngineConfig,
    pub ledger: LedgerConfig,
    /// Label the admin identity is derived from.
    pub admin: String,
    /// Install the in-memory beneficiary gateway. Without it, splits fall
    /// back to paying the caller in full.
    pub gateway: bool,
    /// Log level filter string (e.g. "info", "accrue_engine=debug").
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for AccrueConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            ledger: LedgerConfig::default(),
            admin: "admin".to_string(),
            gateway: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEngine {
    initial_rate: Option<u64>,
    initial_rate_bps: Option<u64>,
    min_epoch_duration: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    engine: RawEngine,
    ledger: Option<LedgerConfig>,
    admin: Option<String>,
    gateway: Option<bool>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
}

impl RawConfig {
    fn resolve(self) -> Result<AccrueConfig, ConfigError> {
        let defaults = AccrueConfig::default();
        let initial_rate = match (self.engine.initial_rate, self.engine.initial_rate_bps) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingRate),
            (Some(rate), None) => rate,
            (None, Some(bps)) => EngineConfig::with_rate_bps(bps)?.initial_rate,
            (None, None) => defaults.engine.initial_rate,
        };
        let cfg = AccrueConfig {
            engine: EngineConfig {
                initial_rate,
                min_epoch_duration: self
                    .engine
                    .min_epoch_duration
                    .unwrap_or(defaults.engine.min_epoch_duration),
            },
            ledger: self.ledger.unwrap_or(defaults.ledger),
            admin: self.admin.unwrap_or(defaults.admin),
            gateway: self.gateway.unwrap_or(defaults.gateway),
            log_level: self.log_level.unwrap_or(defaults.log_level),
            log_format: self.log_format.unwrap_or(defaults.log_format),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl AccrueConfig {
    /// `<config dir>/accrue/accrue.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("accrue").join("accrue.toml"))
    }

    /// Load from `path` (required to exist) or, when `None`, from
    /// [`default_path`](Self::default_path) if present, then apply the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// As [`load`](Self::load), reading environment overrides from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => builder = builder.add_source(File::from(p).required(true)),
            None => {
                if let Some(p) = Self::default_path() {
                    builder = builder.add_source(File::from(p).required(false));
                }
            }
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true);
        if env.is_some() {
            environment = environment.source(env);
        }
        builder = builder.add_source(environment);

        let raw: RawConfig = builder.build()?.try_deserialize()?;
        raw.resolve()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.engine.validate()?;
        self.ledger.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrue_core::constants::{rate_from_bps, DEFAULT_LOCK_PERIOD, MAX_LOCK_PERIOD, MIN_EPOCH_DURATION};
    use std::io::Write;

    fn no_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn write_toml(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("accrue.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn defaults() {
        let cfg = AccrueConfig::default();
        assert_eq!(cfg.engine.initial_rate, 0);
        assert_eq!(cfg.engine.min_epoch_duration, MIN_EPOCH_DURATION);
        assert_eq!(cfg.ledger.lock_period, DEFAULT_LOCK_PERIOD);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert!(cfg.gateway);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(
            &dir,
            r#"
log_level = "debug"
log_format = "json"
gateway = false

[engine]
initial_rate_bps = 500

[ledger]
lock_period = 3600
"#,
        );
        let cfg = AccrueConfig::load_with_env(Some(&path), no_env()).unwrap();
        assert_eq!(cfg.engine.initial_rate, rate_from_bps(500).unwrap());
        assert_eq!(cfg.engine.min_epoch_duration, MIN_EPOCH_DURATION);
        assert_eq!(cfg.ledger.lock_period, 3600);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(!cfg.gateway);
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, "[ledger]\nlock_period = 60\n");
        let cfg = AccrueConfig::load_with_env(
            Some(&path),
            env(&[("ACCRUE__LEDGER__LOCK_PERIOD", "120"), ("ACCRUE__ADMIN", "ops")]),
        )
        .unwrap();
        assert_eq!(cfg.ledger.lock_period, 120);
        assert_eq!(cfg.admin, "ops");
    }

    #[test]
    fn raw_rate_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, "[engine]\ninitial_rate = 42\n");
        let cfg = AccrueConfig::load_with_env(Some(&path), no_env()).unwrap();
        assert_eq!(cfg.engine.initial_rate, 42);
    }

    #[test]
    fn both_rate_forms_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, "[engine]\ninitial_rate = 1\ninitial_rate_bps = 1\n");
        assert!(matches!(
            AccrueConfig::load_with_env(Some(&path), no_env()),
            Err(ConfigError::ConflictingRate)
        ));
    }

    #[test]
    fn out_of_range_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, &format!("[ledger]\nlock_period = {}\n", MAX_LOCK_PERIOD + 1));
        assert!(matches!(
            AccrueConfig::load_with_env(Some(&path), no_env()),
            Err(ConfigError::Invalid(ValidationError::LockPeriodTooLong { .. }))
        ));

        let path = write_toml(&dir, "[engine]\ninitial_rate_bps = 10001\n");
        assert!(matches!(
            AccrueConfig::load_with_env(Some(&path), no_env()),
            Err(ConfigError::Invalid(ValidationError::RateTooHigh { .. }))
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            AccrueConfig::load_with_env(Some(&path), no_env()),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn log_format_display() {
        assert_eq!(LogFormat::Json.to_string(), "json");
        assert_eq!(LogFormat::Text.to_string(), "text");
    }
}
