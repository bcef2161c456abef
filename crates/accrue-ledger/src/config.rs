//! Participant ledger configuration.

use serde::{Deserialize, Serialize};

use accrue_core::constants::{DEFAULT_LOCK_PERIOD, MAX_LOCK_PERIOD};
use accrue_core::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Seconds a deposit stays locked, restarted by every top-up.
    pub lock_period: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_period: DEFAULT_LOCK_PERIOD,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_lock_period(self.lock_period)
    }
}

pub(crate) fn check_lock_period(period: u64) -> Result<(), ValidationError> {
    if period > MAX_LOCK_PERIOD {
        return Err(ValidationError::LockPeriodTooLong {
            period,
            max: MAX_LOCK_PERIOD,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_week() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.lock_period, 7 * 86_400);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_lock_is_allowed() {
        assert!(LedgerConfig { lock_period: 0 }.validate().is_ok());
    }

    #[test]
    fn rejects_lock_beyond_max() {
        let cfg = LedgerConfig {
            lock_period: MAX_LOCK_PERIOD + 1,
        };
        assert_eq!(
            cfg.validate(),
            Err(ValidationError::LockPeriodTooLong {
                period: MAX_LOCK_PERIOD + 1,
                max: MAX_LOCK_PERIOD
            })
        );
    }
}
