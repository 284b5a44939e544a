//! Single-occupancy guard over an `AtomicBool`.

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a flag raised for as long as the guard lives. The flag is lowered
/// on drop, so every exit path (early return, `?`, cancellation) clears it.
#[must_use = "the flag is released as soon as the guard is dropped"]
pub struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    /// Raise `flag` if it is down. Returns `None` when another holder has it.
    pub fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
