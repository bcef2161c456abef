//! Protocol constants. Rates and indices are WAD fixed-point (1.0 = 10^18).

/// Fixed-point unit for rates and the accrual index.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Initial value of the global accrual index (1.0).
pub const INITIAL_INDEX: u128 = WAD;

/// Upper bound on the annual rate: 100% per year.
pub const MAX_RATE_PER_YEAR: u64 = WAD as u64;

/// Seconds in a 365-day year. Annual rates are spread over this many seconds.
pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

/// Seconds in a day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Basis-point denominator (10 000 bps = 100%).
pub const BPS_PRECISION: u64 = 10_000;

/// Largest allowed beneficiary share.
pub const MAX_SHARE_BPS: u32 = BPS_PRECISION as u32;

/// Minimum spacing between two epoch snapshots.
pub const MIN_EPOCH_DURATION: u64 = SECONDS_PER_DAY;

/// Lock applied to fresh deposits unless configured otherwise.
pub const DEFAULT_LOCK_PERIOD: u64 = 7 * SECONDS_PER_DAY;

/// Longest lock period an administrator may configure.
pub const MAX_LOCK_PERIOD: u64 = SECONDS_PER_YEAR;

/// Version tag written into engine snapshots.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Convert an annual rate in basis points to a WAD rate.
///
/// Returns `None` when the result would exceed [`MAX_RATE_PER_YEAR`].
///
/// # Examples
///
/// ```
/// use accrue_core::constants::{rate_from_bps, WAD};
/// assert_eq!(rate_from_bps(1_000), Some((WAD / 10) as u64));
/// assert_eq!(rate_from_bps(10_001), None);
/// ```
pub fn rate_from_bps(bps: u64) -> Option<u64> {
    if bps > BPS_PRECISION {
        return None;
    }
    Some(bps * (MAX_RATE_PER_YEAR / BPS_PRECISION))
}
