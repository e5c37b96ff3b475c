//! Single-flight gate for load, reload and unload.

use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking exclusion for load, reload and unload.
///
/// A second caller does not wait: [`LoadGate::try_acquire`] returns `None`
/// and the caller reports the contention.
#[derive(Debug, Default)]
pub struct LoadGate {
    busy: AtomicBool,
}

impl LoadGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<LoadPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadPermit { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one load-family operation. Released on drop,
/// including when the operation fails or its future is cancelled.
#[derive(Debug)]
pub struct LoadPermit<'a> {
    gate: &'a LoadGate,
}

impl Drop for LoadPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
