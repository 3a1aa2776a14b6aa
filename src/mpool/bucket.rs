//! DB_MPOOL_HASH — one hash bucket's worth of cached pages.
//!
//! Each bucket keeps its member slots ordered by ascending priority so
//! the allocator's eviction sweep can pop the coldest candidate without
//! re-scanning the whole bucket.

use parking_lot::Mutex;

use crate::common::FrameId;

/// A single hash chain, protected by its own mutex so unrelated buckets
/// never contend with each other.
pub struct Bucket {
    slots: Mutex<Vec<FrameId>>,
}

impl Bucket {
    pub fn new() -> Self {
        Self { slots: Mutex::new(Vec::new()) }
    }

    pub fn insert(&self, slot: FrameId) {
        self.slots.lock().push(slot);
    }

    pub fn remove(&self, slot: FrameId) {
        self.slots.lock().retain(|&s| s != slot);
    }

    pub fn contains(&self, slot: FrameId) -> bool {
        self.slots.lock().contains(&slot)
    }

    pub fn iter_snapshot(&self) -> Vec<FrameId> {
        self.slots.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a over the file id and page number; good enough distribution for
/// the handful of buckets this pool typically runs with.
pub fn bucket_hash(file_id: u32, pgno: u32, nbuckets: usize) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for byte in file_id.to_le_bytes().into_iter().chain(pgno.to_le_bytes()) {
        h ^= byte as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h as usize) % nbuckets.max(1)
}
