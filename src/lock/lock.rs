//! `__db_lock` — a single granted or pending lock request.

use std::sync::atomic::{AtomicU32, Ordering};

use super::locker::LockerId;
use super::mode::LockMode;
use super::object::ObjectKey;

/// Lifecycle state of one lock request. A request starts `Pending`,
/// becomes `Held` once granted, `Waiting` while queued behind a
/// conflicting holder, and ends in `Aborted`/`Expired`/`Free`/`NotExist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Pending,
    Held,
    Waiting,
    Aborted,
    Expired,
    Free,
    /// The underlying object was removed (`put_obj`) while this request
    /// still held or waited on it.
    NotExist,
}

/// A single lock request, granted or still queued. `gen` disambiguates
/// repeated requests by the same locker on the same object (e.g. after
/// an upgrade), and is what the object's holder/waiter entries key on
/// alongside the locker id.
#[derive(Debug)]
pub struct Lock {
    pub locker: LockerId,
    pub object: ObjectKey,
    pub mode: LockMode,
    pub gen: u32,
    status: parking_lot::Mutex<LockStatus>,
    refcount: AtomicU32,
}

impl Lock {
    pub fn new(locker: LockerId, object: ObjectKey, mode: LockMode, gen: u32) -> Self {
        Self {
            locker,
            object,
            mode,
            gen,
            status: parking_lot::Mutex::new(LockStatus::Pending),
            refcount: AtomicU32::new(1),
        }
    }

    pub fn status(&self) -> LockStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: LockStatus) {
        *self.status.lock() = status;
    }

    pub fn is_held(&self) -> bool {
        self.status() == LockStatus::Held
    }

    pub fn incr_ref(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decr_ref(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn ref_count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_starts_pending() {
        let lock = Lock::new(1, ObjectKey::from_page(1, 1), LockMode::Read, 1);
        assert_eq!(lock.status(), LockStatus::Pending);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_lock_grant_transition() {
        let lock = Lock::new(1, ObjectKey::from_page(1, 1), LockMode::Write, 1);
        lock.set_status(LockStatus::Held);
        assert!(lock.is_held());
    }

    #[test]
    fn test_lock_refcounting() {
        let lock = Lock::new(1, ObjectKey::from_page(1, 1), LockMode::Read, 1);
        assert_eq!(lock.ref_count(), 1);
        lock.incr_ref();
        assert_eq!(lock.ref_count(), 2);
        lock.decr_ref();
        assert_eq!(lock.ref_count(), 1);
    }
}
