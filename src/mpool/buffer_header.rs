//! BH — the cached form of a page plus its buffer-pool metadata.
//!
//! A page cache addressed by `(file, pgno)` instead of just `pgno`, with
//! the priority/flags the allocator's eviction sweep needs.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::macros::bitflags_lite;
use crate::common::PageId;
use crate::mpool::file::FileId;
use crate::storage::page::Page;

/// Identifies a cached page uniquely across every registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub file_id: FileId,
    pub pgno: PageId,
}

impl BufferKey {
    pub fn new(file_id: FileId, pgno: PageId) -> Self {
        Self { file_id, pgno }
    }
}

bitflags_lite! {
    /// Per-BH state flags.
    pub struct BhFlags: u8 {
        const DIRTY        = 0b0000_0001;
        const DIRTY_CREATE = 0b0000_0010;
        const TRASH        = 0b0000_0100;
        const LOCKED       = 0b0000_1000;
        const CALLPGIN     = 0b0001_0000;
    }
}

/// A cached page plus its buffer-pool bookkeeping.
///
/// # Thread safety
/// - `page`: `RwLock` for shared-read / exclusive-write access to bytes.
/// - `key`, `priority`, `flags`: `Mutex`-free via a single metadata lock,
///   since they're always updated together with the bucket lock held.
/// - `ref_count`, `ref_sync`: atomics, read without any lock for fast
///   "is this pinned" checks.
pub struct BufferHeader {
    page: RwLock<Page>,
    meta: parking_lot::Mutex<BhMeta>,
    ref_count: AtomicU32,
    ref_sync: AtomicU32,
}

struct BhMeta {
    key: Option<BufferKey>,
    priority: u64,
    flags: BhFlags,
}

impl BufferHeader {
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new()),
            meta: parking_lot::Mutex::new(BhMeta {
                key: None,
                priority: 0,
                flags: BhFlags::empty(),
            }),
            ref_count: AtomicU32::new(0),
            ref_sync: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    pub fn key(&self) -> Option<BufferKey> {
        self.meta.lock().key
    }

    pub fn set_key(&self, key: Option<BufferKey>) {
        self.meta.lock().key = key;
    }

    pub fn priority(&self) -> u64 {
        self.meta.lock().priority
    }

    pub fn set_priority(&self, priority: u64) {
        self.meta.lock().priority = priority;
    }

    pub fn flags(&self) -> BhFlags {
        self.meta.lock().flags
    }

    pub fn insert_flag(&self, flag: BhFlags) {
        self.meta.lock().flags.insert(flag);
    }

    pub fn remove_flag(&self, flag: BhFlags) {
        self.meta.lock().flags.remove(flag);
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(BhFlags::DIRTY)
    }

    pub fn is_trash(&self) -> bool {
        self.flags().contains(BhFlags::TRASH)
    }

    pub fn is_locked(&self) -> bool {
        self.flags().contains(BhFlags::LOCKED)
    }

    /// Increment refcount. Panics (surfaced by the caller as a PANIC
    /// error in release builds we'd rather not unwind from, but an
    /// overflow here means thousands of concurrent pinners, which never
    /// happens in practice) on overflow.
    pub fn pin(&self) -> u32 {
        let old = self.ref_count.fetch_add(1, Ordering::AcqRel);
        assert!(old < u32::MAX, "BH refcount overflow");
        old + 1
    }

    pub fn unpin(&self) -> u32 {
        let old = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "BH refcount underflow");
        old - 1
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.ref_count() > 0
    }

    pub fn set_ref_sync(&self, v: u32) {
        self.ref_sync.store(v, Ordering::Release);
    }

    pub fn ref_sync(&self) -> u32 {
        self.ref_sync.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.key().is_none()
    }

    pub fn is_evictable(&self) -> bool {
        self.key().is_some() && !self.is_pinned() && !self.is_locked()
    }

    /// Reset to the empty state, ready to be reused by a different page.
    pub fn reset(&self) {
        self.page_mut().reset();
        let mut meta = self.meta.lock();
        meta.key = None;
        meta.flags = BhFlags::empty();
        self.ref_count.store(0, Ordering::Release);
        self.ref_sync.store(0, Ordering::Release);
    }
}

impl Default for BufferHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonically advancing LRU counter, stored once per cache. Priorities
/// handed to newly pinned buffers come from here; "younger" == larger.
#[derive(Debug, Default)]
pub struct LruCounter(AtomicU64);

impl LruCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_new_is_empty() {
        let bh = BufferHeader::new();
        assert!(bh.is_empty());
        assert!(!bh.is_pinned());
        assert!(!bh.is_dirty());
    }

    #[test]
    fn test_bh_pin_unpin() {
        let bh = BufferHeader::new();
        assert_eq!(bh.pin(), 1);
        assert_eq!(bh.pin(), 2);
        assert_eq!(bh.unpin(), 1);
        assert_eq!(bh.unpin(), 0);
        assert!(!bh.is_pinned());
    }

    #[test]
    fn test_bh_flags() {
        let bh = BufferHeader::new();
        bh.insert_flag(BhFlags::DIRTY);
        assert!(bh.is_dirty());
        bh.remove_flag(BhFlags::DIRTY);
        assert!(!bh.is_dirty());
    }

    #[test]
    fn test_bh_evictable_requires_unpinned_and_unlocked() {
        let bh = BufferHeader::new();
        bh.set_key(Some(BufferKey::new(FileId::new(1), PageId::new(0))));
        assert!(bh.is_evictable());

        bh.pin();
        assert!(!bh.is_evictable());
        bh.unpin();

        bh.insert_flag(BhFlags::LOCKED);
        assert!(!bh.is_evictable());
    }

    #[test]
    fn test_lru_counter_monotonic() {
        let c = LruCounter::new();
        let a = c.next();
        let b = c.next();
        assert!(b > a);
    }
}
