//! Accrual engine configuration.

use serde::{Deserialize, Serialize};

use accrue_core::constants::{rate_from_bps, BPS_PRECISION, MAX_RATE_PER_YEAR, MIN_EPOCH_DURATION};
use accrue_core::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// WAD-scaled annual rate at creation.
    pub initial_rate: u64,
    /// Minimum seconds between epoch snapshots.
    pub min_epoch_duration: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_rate: 0,
            min_epoch_duration: MIN_EPOCH_DURATION,
        }
    }
}

impl EngineConfig {
    /// Default configuration with the annual rate given in basis points.
    pub fn with_rate_bps(bps: u64) -> Result<Self, ValidationError> {
        let initial_rate = rate_from_bps(bps).ok_or(ValidationError::RateTooHigh {
            rate: bps.saturating_mul(MAX_RATE_PER_YEAR / BPS_PRECISION),
            max: MAX_RATE_PER_YEAR,
        })?;
        Ok(Self {
            initial_rate,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.initial_rate > MAX_RATE_PER_YEAR {
            return Err(ValidationError::RateTooHigh {
                rate: self.initial_rate,
                max: MAX_RATE_PER_YEAR,
            });
        }
        if self.min_epoch_duration == 0 {
            return Err(ValidationError::ZeroEpochDuration);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrue_core::constants::WAD;

    #[test]
    fn default_is_zero_rate_daily_epochs() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.initial_rate, 0);
        assert_eq!(cfg.min_epoch_duration, MIN_EPOCH_DURATION);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn with_rate_bps_converts() {
        let cfg = EngineConfig::with_rate_bps(1_000).unwrap();
        assert_eq!(cfg.initial_rate as u128, WAD / 10);
    }

    #[test]
    fn with_rate_bps_rejects_above_100_percent() {
        assert!(EngineConfig::with_rate_bps(10_001).is_err());
    }

    #[test]
    fn validate_rejects_excessive_rate() {
        let cfg = EngineConfig {
            initial_rate: MAX_RATE_PER_YEAR + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ValidationError::RateTooHigh { .. })));
    }

    #[test]
    fn validate_rejects_zero_epoch_duration() {
        let cfg = EngineConfig {
            min_epoch_duration: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ValidationError::ZeroEpochDuration));
    }
}
