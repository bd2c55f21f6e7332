#![forbid(unsafe_code)]

//! Re-entrant-aware ownership lock shared by observable collections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

/// What a lock request produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    /// The caller now owns the collection and must release it.
    Exclusive,
    /// The caller already owned it and is delivering changes (a listener
    /// locking again): read-only view, nothing to release.
    ReadOnly,
    /// The caller already owned it outside of delivery: every edit fails,
    /// nothing to release.
    Nested,
}

impl LockMode {
    pub(crate) fn owns(self) -> bool {
        self == Self::Exclusive
    }
}

pub(crate) struct CollectionLock {
    owner: Mutex<Option<ThreadId>>,
    delivering: AtomicBool,
    released: Condvar,
}

impl CollectionLock {
    pub(crate) fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            delivering: AtomicBool::new(false),
            released: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) -> LockMode {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            return if self.delivering.load(Ordering::Acquire) {
                LockMode::ReadOnly
            } else {
                LockMode::Nested
            };
        }
        while owner.is_some() {
            self.released.wait(&mut owner);
        }
        *owner = Some(me);
        LockMode::Exclusive
    }

    pub(crate) fn release(&self) {
        *self.owner.lock() = None;
        self.released.notify_one();
    }

    /// Mark the owning thread as delivering changes while `deliver` runs.
    pub(crate) fn delivering(&self, deliver: impl FnOnce()) {
        struct Reset<'a>(&'a AtomicBool);
        impl Drop for Reset<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::Release);
            }
        }
        self.delivering.store(true, Ordering::Release);
        let _reset = Reset(&self.delivering);
        deliver();
    }
}

/// Releases an exclusively held lock on drop, including during unwinding.
pub(crate) struct ReleaseOnDrop<'a>(pub(crate) &'a CollectionLock);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
