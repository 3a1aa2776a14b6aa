//! DB_LOCKOBJ — the lockable object identity plus its holders and
//! waiters lists. Objects are addressed by an opaque byte key (a page
//! id, a handle id, whatever the caller wants to serialize); the lock
//! manager never interprets the bytes itself.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::locker::LockerId;
use super::mode::LockMode;

/// Opaque identity of a lockable resource. Small keys (page locks) are
/// just a few bytes; the manager treats this as an equality key, never
/// interpreting its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(pub Vec<u8>);

impl ObjectKey {
    pub fn from_page(file_id: u32, pgno: u32) -> Self {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&file_id.to_le_bytes());
        bytes.extend_from_slice(&pgno.to_le_bytes());
        ObjectKey(bytes)
    }

    pub fn from_handle(handle_id: u32) -> Self {
        ObjectKey(handle_id.to_le_bytes().to_vec())
    }
}

/// Monotonically increasing identifier handed to every granted lock,
/// used to break ties in FIFO grant ordering and as the generation
/// stamped into each `Lock`.
#[derive(Debug, Default)]
pub struct GenCounter(AtomicU32);

impl GenCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A single entry in an object's holder or waiter list: who holds (or
/// wants) the lock, and in what mode.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub locker: LockerId,
    pub mode: LockMode,
    pub lock_gen: u32,
}

/// Queue position for a newly-blocked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPosition {
    Head,
    Second,
    Tail,
}

/// One lockable resource's state: who currently holds it, in what
/// modes, and who is queued up waiting. Held behind a single mutex
/// since holder/waiter mutations always happen together. The manager
/// keys these by `ObjectKey` in its object table, so the object itself
/// doesn't need to carry its own key.
#[derive(Debug, Default)]
pub struct LockObject {
    inner: Mutex<ObjectState>,
}

#[derive(Debug, Default)]
struct ObjectState {
    holders: Vec<Entry>,
    waiters: Vec<Entry>,
}

impl LockObject {
    pub fn new() -> Self {
        Self { inner: Mutex::new(ObjectState::default()) }
    }

    pub fn holders(&self) -> Vec<Entry> {
        self.inner.lock().holders.clone()
    }

    pub fn waiters(&self) -> Vec<Entry> {
        self.inner.lock().waiters.clone()
    }

    pub fn has_waiters(&self) -> bool {
        !self.inner.lock().waiters.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        let s = self.inner.lock();
        s.holders.is_empty() && s.waiters.is_empty()
    }

    pub fn add_holder(&self, entry: Entry) {
        self.inner.lock().holders.push(entry);
    }

    pub fn remove_holder(&self, locker: LockerId, lock_gen: u32) -> Option<Entry> {
        let mut s = self.inner.lock();
        if let Some(pos) = s
            .holders
            .iter()
            .position(|e| e.locker == locker && e.lock_gen == lock_gen)
        {
            Some(s.holders.remove(pos))
        } else {
            None
        }
    }

    pub fn push_waiter(&self, entry: Entry) {
        self.insert_waiter(entry, WaitPosition::Tail);
    }

    /// Inserts a waiter at the given queue position. `Head` jumps the
    /// whole queue (blocked upgrade requests); `Second` slots in behind
    /// whatever is currently at the head (a DIRTY reader that must not
    /// jump past a matching-identity upgrade); `Tail` is plain FIFO.
    pub fn insert_waiter(&self, entry: Entry, position: WaitPosition) {
        let mut s = self.inner.lock();
        let idx = match position {
            WaitPosition::Tail => s.waiters.len(),
            WaitPosition::Head => 0,
            WaitPosition::Second => s.waiters.len().min(1),
        };
        s.waiters.insert(idx, entry);
    }

    /// Removes and returns the front waiter, if any (FIFO grant order).
    pub fn pop_front_waiter(&self) -> Option<Entry> {
        let mut s = self.inner.lock();
        if s.waiters.is_empty() {
            None
        } else {
            Some(s.waiters.remove(0))
        }
    }

    pub fn remove_waiter(&self, locker: LockerId, lock_gen: u32) -> Option<Entry> {
        let mut s = self.inner.lock();
        if let Some(pos) = s
            .waiters
            .iter()
            .position(|e| e.locker == locker && e.lock_gen == lock_gen)
        {
            Some(s.waiters.remove(pos))
        } else {
            None
        }
    }

    /// Promotes the first waiter whose mode doesn't conflict with any
    /// currently-held mode, granting it by moving it into holders.
    /// Returns the granted entry if one was promoted.
    pub fn try_grant_next(&self, matrix: &super::mode::ConflictMatrix) -> Option<Entry> {
        let mut s = self.inner.lock();
        let idx = s.waiters.iter().position(|w| {
            !s.holders
                .iter()
                .any(|h| matrix.conflicts(h.mode, w.mode) && h.locker != w.locker)
        })?;
        let entry = s.waiters.remove(idx);
        s.holders.push(entry);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::mode::ConflictMatrix;

    #[test]
    fn test_add_and_remove_holder() {
        let obj = LockObject::new();
        let e = Entry { locker: 10, mode: LockMode::Read, lock_gen: 1 };
        obj.add_holder(e);
        assert_eq!(obj.holders().len(), 1);
        obj.remove_holder(10, 1);
        assert!(obj.holders().is_empty());
    }

    #[test]
    fn test_fifo_waiter_order() {
        let obj = LockObject::new();
        obj.push_waiter(Entry { locker: 1, mode: LockMode::Write, lock_gen: 1 });
        obj.push_waiter(Entry { locker: 2, mode: LockMode::Write, lock_gen: 2 });
        let first = obj.pop_front_waiter().unwrap();
        assert_eq!(first.locker, 1);
    }

    #[test]
    fn test_try_grant_next_skips_conflicting() {
        let obj = LockObject::new();
        let matrix = ConflictMatrix::standard();
        obj.add_holder(Entry { locker: 1, mode: LockMode::Write, lock_gen: 1 });
        obj.push_waiter(Entry { locker: 2, mode: LockMode::Read, lock_gen: 2 });
        assert!(obj.try_grant_next(&matrix).is_none());
    }

    #[test]
    fn test_insert_waiter_head_and_second() {
        let obj = LockObject::new();
        obj.push_waiter(Entry { locker: 1, mode: LockMode::Write, lock_gen: 1 });
        obj.insert_waiter(Entry { locker: 2, mode: LockMode::Write, lock_gen: 2 }, WaitPosition::Head);
        obj.insert_waiter(Entry { locker: 3, mode: LockMode::Dirty, lock_gen: 3 }, WaitPosition::Second);
        let order: Vec<_> = obj.waiters().iter().map(|e| e.locker).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_try_grant_next_grants_compatible() {
        let obj = LockObject::new();
        let matrix = ConflictMatrix::standard();
        obj.add_holder(Entry { locker: 1, mode: LockMode::Read, lock_gen: 1 });
        obj.push_waiter(Entry { locker: 2, mode: LockMode::Read, lock_gen: 2 });
        let granted = obj.try_grant_next(&matrix).unwrap();
        assert_eq!(granted.locker, 2);
        assert_eq!(obj.holders().len(), 2);
    }
}
