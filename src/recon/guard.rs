use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide "sync in progress" flag.
///
/// Acquired with a compare-and-set; the returned permit clears the flag when it is
/// dropped, which covers success, early return, error and panic unwind alike.
#[derive(Debug, Default)]
pub struct SyncGuard {
    in_progress: AtomicBool,
}

#[derive(Debug)]
pub struct SyncPermit<'a> {
    guard: &'a SyncGuard,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if another pass holds the guard.
    pub fn try_acquire(&self) -> Option<SyncPermit<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncPermit { guard: self })
    }

    pub fn is_active(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.guard.in_progress.store(false, Ordering::Release);
    }
}
