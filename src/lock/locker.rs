//! DB_LOCKER — per-logical-transaction lock state, plus the id
//! allocator that partitions the 32-bit id space into transactional and
//! family ranges.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::config::{DB_LOCK_MAXID, TXN_MINIMUM};
use crate::common::macros::bitflags_lite;
use crate::common::{Error, Result, Timeval};

bitflags_lite! {
    pub struct LockerFlags: u8 {
        const DELETED = 0b0000_0001;
        const DIRTY   = 0b0000_0010;
        const TIMEOUT = 0b0000_0100;
        const INABORT = 0b0000_1000;
    }
}

pub type LockerId = u32;

/// Per-locker bookkeeping: identity, family links, counts, and the
/// timeout state the deadlock detector consults.
pub struct Locker {
    pub id: LockerId,
    pub parent: Option<LockerId>,
    pub flags: Mutex<LockerFlags>,
    pub nlocks: AtomicU32,
    pub nwrites: AtomicU32,
    /// Per-lock timeout for requests made by this locker (0 = none).
    pub lk_timeout_us: AtomicU32,
    pub tx_expire: Mutex<Timeval>,
    pub lk_expire: Mutex<Timeval>,
}

impl Locker {
    pub fn new(id: LockerId, parent: Option<LockerId>) -> Self {
        Self {
            id,
            parent,
            flags: Mutex::new(LockerFlags::empty()),
            nlocks: AtomicU32::new(0),
            nwrites: AtomicU32::new(0),
            lk_timeout_us: AtomicU32::new(0),
            tx_expire: Mutex::new(Timeval::INVALID),
            lk_expire: Mutex::new(Timeval::INVALID),
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.id < TXN_MINIMUM
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.lock().contains(LockerFlags::DELETED)
    }

    pub fn mark_deleted(&self, deleted: bool) {
        let mut f = self.flags.lock();
        if deleted {
            f.insert(LockerFlags::DELETED);
        } else {
            f.remove(LockerFlags::DELETED);
        }
    }
}

/// Allocates and frees 32-bit locker ids, keeping transactional ids in
/// `[1, TXN_MINIMUM)` and family/handle ids in `[TXN_MINIMUM, DB_LOCK_MAXID]`.
/// Wraps around within a range by collecting the still-live ids and
/// picking the first gap.
pub struct LockerIdAllocator {
    next_txn: AtomicU32,
    next_family: AtomicU32,
    live: Mutex<HashSet<LockerId>>,
}

impl LockerIdAllocator {
    pub fn new() -> Self {
        Self {
            next_txn: AtomicU32::new(1),
            next_family: AtomicU32::new(TXN_MINIMUM),
            live: Mutex::new(HashSet::new()),
        }
    }

    pub fn alloc_txn(&self) -> Result<LockerId> {
        self.alloc_in_range(&self.next_txn, 1, TXN_MINIMUM - 1)
    }

    pub fn alloc_family(&self) -> Result<LockerId> {
        self.alloc_in_range(&self.next_family, TXN_MINIMUM, DB_LOCK_MAXID)
    }

    fn alloc_in_range(&self, cursor: &AtomicU32, lo: u32, hi: u32) -> Result<LockerId> {
        let mut live = self.live.lock();

        let start = cursor.load(Ordering::Relaxed);
        let mut candidate = start;
        loop {
            if !live.contains(&candidate) {
                live.insert(candidate);
                let next = if candidate >= hi { lo } else { candidate + 1 };
                cursor.store(next, Ordering::Relaxed);
                return Ok(candidate);
            }
            candidate = if candidate >= hi { lo } else { candidate + 1 };
            if candidate == start {
                return Err(Error::NoSpace);
            }
        }
    }

    pub fn free(&self, id: LockerId) {
        self.live.lock().remove(&id);
    }

    pub fn is_live(&self, id: LockerId) -> bool {
        self.live.lock().contains(&id)
    }
}

impl Default for LockerIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_ids_stay_below_minimum() {
        let a = LockerIdAllocator::new();
        for _ in 0..10 {
            let id = a.alloc_txn().unwrap();
            assert!(id < TXN_MINIMUM);
        }
    }

    #[test]
    fn test_family_ids_stay_at_or_above_minimum() {
        let a = LockerIdAllocator::new();
        let id = a.alloc_family().unwrap();
        assert!(id >= TXN_MINIMUM);
    }

    #[test]
    fn test_free_then_realloc_reuses_id() {
        let a = LockerIdAllocator::new();
        let id1 = a.alloc_txn().unwrap();
        let id2 = a.alloc_txn().unwrap();
        assert_ne!(id1, id2);
        a.free(id1);
        assert!(!a.is_live(id1));
    }

    #[test]
    fn test_wraparound_finds_freed_id() {
        let a = LockerIdAllocator::new();
        a.next_txn.store(TXN_MINIMUM - 1, Ordering::Relaxed);
        let last = a.alloc_txn().unwrap();
        assert_eq!(last, TXN_MINIMUM - 1);
        // cursor wraps to 1, but 1 is free
        let wrapped = a.alloc_txn().unwrap();
        assert_eq!(wrapped, 1);
    }
}
