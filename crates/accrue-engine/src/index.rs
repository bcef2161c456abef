//! Lazy global-index math.
//!
//! Pure functions over [`GlobalAccrualState`] and [`AccountPosition`]; the
//! engine applies them to copies and commits only when every step succeeded.

use accrue_core::error::MathError;
use accrue_core::math::{index_growth, yield_between};
use accrue_core::types::{AccountPosition, GlobalAccrualState};

/// Bring `global.index` up to `now`.
///
/// With nothing deposited, or no time elapsed, only `last_update_time`
/// moves. A clock reading earlier than `last_update_time` counts as zero
/// elapsed and leaves the timestamp where it is.
pub fn accrue(global: &mut GlobalAccrualState, now: u64) -> Result<(), MathError> {
    let elapsed = now.saturating_sub(global.last_update_time);
    if elapsed == 0 || global.total_principal == 0 {
        global.last_update_time = global.last_update_time.max(now);
        return Ok(());
    }
    let growth = index_growth(global.rate_per_year, elapsed)?;
    global.index = global
        .index
        .checked_add(growth)
        .ok_or(MathError::ArithmeticFault)?;
    global.last_update_time = now;
    Ok(())
}

/// The index [`accrue`] would produce at `now`, without mutating anything.
pub fn projected_index(global: &GlobalAccrualState, now: u64) -> Result<u128, MathError> {
    if global.total_principal == 0 {
        return Ok(global.index);
    }
    let elapsed = now.saturating_sub(global.last_update_time);
    let growth = index_growth(global.rate_per_year, elapsed)?;
    global
        .index
        .checked_add(growth)
        .ok_or(MathError::ArithmeticFault)
}

/// Settled plus unsettled yield of `position` at `index`.
pub fn pending(position: &AccountPosition, index: u128) -> Result<u64, MathError> {
    let fresh = yield_between(position.principal, position.index_snapshot, index)?;
    position
        .accrued
        .checked_add(fresh)
        .ok_or(MathError::ArithmeticFault)
}

/// Fold unsettled yield into `accrued` and move the snapshot to `index`.
///
/// Must run before any change to `principal`, otherwise yield earned at the
/// old principal would be lost or overstated.
pub fn settle(position: &mut AccountPosition, index: u128) -> Result<(), MathError> {
    position.accrued = pending(position, index)?;
    position.index_snapshot = index;
    Ok(())
}
