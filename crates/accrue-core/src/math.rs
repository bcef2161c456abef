//! WAD fixed-point arithmetic for the accrual index.
//!
//! Integer-only, u128 intermediates, every step checked. Overflow surfaces as
//! [`MathError::ArithmeticFault`]; nothing wraps or saturates silently.

use crate::constants::{BPS_PRECISION, SECONDS_PER_YEAR, WAD};
use crate::error::MathError;

/// Index growth over `elapsed` seconds at a WAD annual rate.
///
/// `rate_per_year * elapsed / SECONDS_PER_YEAR`, rounded down.
///
/// # Examples
///
/// ```
/// use accrue_core::constants::{SECONDS_PER_YEAR, WAD};
/// use accrue_core::math::index_growth;
/// let ten_percent = (WAD / 10) as u64;
/// assert_eq!(index_growth(ten_percent, SECONDS_PER_YEAR).unwrap(), WAD / 10);
/// ```
pub fn index_growth(rate_per_year: u64, elapsed: u64) -> Result<u128, MathError> {
    (rate_per_year as u128)
        .checked_mul(elapsed as u128)
        .map(|v| v / SECONDS_PER_YEAR as u128)
        .ok_or(MathError::ArithmeticFault)
}

/// `amount * index_delta / WAD`, rounded down.
///
/// Splits `index_delta` into whole and fractional WAD parts so the
/// intermediate product never exceeds `u64::MAX * WAD`.
pub fn mul_wad(amount: u64, index_delta: u128) -> Result<u64, MathError> {
    let whole = index_delta / WAD;
    let frac = index_delta % WAD;
    let a = amount as u128;

    let whole_part = a.checked_mul(whole).ok_or(MathError::ArithmeticFault)?;
    let frac_part = a.checked_mul(frac).ok_or(MathError::ArithmeticFault)? / WAD;
    let total = whole_part
        .checked_add(frac_part)
        .ok_or(MathError::ArithmeticFault)?;

    u64::try_from(total).map_err(|_| MathError::ArithmeticFault)
}

/// Yield earned by `principal` between two index values.
///
/// A `current` below `snapshot` would mean the index went backward and is a
/// fault, not zero.
pub fn yield_between(principal: u64, snapshot: u128, current: u128) -> Result<u64, MathError> {
    let delta = current
        .checked_sub(snapshot)
        .ok_or(MathError::ArithmeticFault)?;
    if delta == 0 || principal == 0 {
        return Ok(0);
    }
    mul_wad(principal, delta)
}

/// `amount * bps / BPS_PRECISION`, rounded down.
pub fn bps_of(amount: u64, bps: u32) -> Result<u64, MathError> {
    (amount as u128)
        .checked_mul(bps as u128)
        .map(|v| v / BPS_PRECISION as u128)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or(MathError::ArithmeticFault)
}

/// Split a claim into `(to_caller, to_beneficiary)`.
///
/// The beneficiary share is rounded down; the remainder stays with the caller,
/// so the two parts always sum to `amount`.
///
/// # Examples
///
/// ```
/// use accrue_core::math::split_amount;
/// assert_eq!(split_amount(101, 5_000).unwrap(), (51, 50));
/// assert_eq!(split_amount(100, 0).unwrap(), (100, 0));
/// ```
pub fn split_amount(amount: u64, share_bps: u32) -> Result<(u64, u64), MathError> {
    let to_beneficiary = bps_of(amount, share_bps)?;
    let to_caller = amount
        .checked_sub(to_beneficiary)
        .ok_or(MathError::ArithmeticFault)?;
    Ok((to_caller, to_beneficiary))
}

/// Notional book-wide yield over an epoch.
///
/// `total_principal * rate_per_year * elapsed / (SECONDS_PER_YEAR * WAD)`.
pub fn epoch_accrual(total_principal: u64, rate_per_year: u64, elapsed: u64) -> Result<u64, MathError> {
    if total_principal == 0 {
        return Ok(0);
    }
    let numerator = (total_principal as u128)
        .checked_mul(rate_per_year as u128)
        .and_then(|v| v.checked_mul(elapsed as u128))
        .ok_or(MathError::ArithmeticFault)?;
    let denominator = (SECONDS_PER_YEAR as u128)
        .checked_mul(WAD)
        .ok_or(MathError::ArithmeticFault)?;
    u64::try_from(numerator / denominator).map_err(|_| MathError::ArithmeticFault)
}
