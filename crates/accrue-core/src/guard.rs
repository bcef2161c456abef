//! Nested-entry guard for value-bearing call paths.
//!
//! Same-thread re-entry (a collaborator calling back while a payout is in
//! flight) is rejected with [`StateError::Reentrancy`]. Other threads wait
//! for the current holder to finish instead of failing, unless the waiting
//! thread already holds a guard itself: then it fails at once, so two
//! threads crossing between guarded paths can never wait on each other.

use std::cell::Cell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::StateError;

thread_local! {
    /// Guards held by the current thread.
    static HELD_HERE: Cell<u32> = const { Cell::new(0) };
}

#[derive(Debug, Default)]
pub struct CallGuard {
    held: ReentrantMutex<Cell<bool>>,
}

/// Releases the guard on drop.
pub struct GuardToken<'a> {
    held: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl CallGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the guarded path named `path`.
    pub fn enter(&self, path: &'static str) -> Result<GuardToken<'_>, StateError> {
        let held = if HELD_HERE.get() > 0 {
            self.held.try_lock().ok_or(StateError::Reentrancy(path))?
        } else {
            self.held.lock()
        };
        if held.get() {
            return Err(StateError::Reentrancy(path));
        }
        held.set(true);
        HELD_HERE.set(HELD_HERE.get() + 1);
        Ok(GuardToken { held })
    }

    /// Whether some call currently holds the guard.
    pub fn is_held(&self) -> bool {
        self.held.try_lock().map(|h| h.get()).unwrap_or(true)
    }
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.held.set(false);
        HELD_HERE.set(HELD_HERE.get().saturating_sub(1));
    }
}
