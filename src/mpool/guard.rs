//! RAII guards for pinned pages.
//!
//! Keyed by `(file, pgno)`, the key the multi-file pool addresses pages
//! by. Both guards auto-unpin (and, for writers, re-rank the buffer's
//! priority) when dropped.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::FrameId;
use crate::mpool::buffer_header::BufferKey;
use crate::mpool::cache::Mpool;
use crate::storage::page::Page;

/// Shared read access to a cached page. Multiple readers may hold this
/// for the same page at once.
pub struct PageReadGuard<'a> {
    mpool: &'a Mpool,
    slot: FrameId,
    key: BufferKey,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        mpool: &'a Mpool,
        slot: FrameId,
        key: BufferKey,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self { mpool, slot, key, lock }
    }

    #[inline]
    pub fn key(&self) -> BufferKey {
        self.key
    }

    #[inline]
    pub fn slot(&self) -> FrameId {
        self.slot
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.mpool.fput_internal(self.slot, false);
    }
}

/// Exclusive write access to a cached page. Marks the buffer dirty and
/// (per the bump-on-release rule) raises its priority when dropped.
pub struct PageWriteGuard<'a> {
    mpool: &'a Mpool,
    slot: FrameId,
    key: BufferKey,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        mpool: &'a Mpool,
        slot: FrameId,
        key: BufferKey,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self { mpool, slot, key, lock }
    }

    #[inline]
    pub fn key(&self) -> BufferKey {
        self.key
    }

    #[inline]
    pub fn slot(&self) -> FrameId {
        self.slot
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.lock
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.mpool.fput_internal(self.slot, true);
    }
}
