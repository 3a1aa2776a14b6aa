//! Mpool — the shared buffer-pool manager.
//!
//! Manages a registry of files rather than a single disk file, with a
//! priority-bucket eviction sweep (`memp_alloc`): lower-priority buffers
//! are evicted first, and a buffer's priority is
//! bumped every time it's released after a write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::RwLock;

use crate::common::config::{EnvConfig, EVICT_SCAN_WIDTH, EVICT_SKIP_PERCENT, SYNC_WAIT_ROUNDS};
use crate::common::{Error, FrameId, Lsn, PageId, Result};
use crate::mpool::bucket::{bucket_hash, Bucket};
use crate::mpool::buffer_header::{BhFlags, BufferHeader, BufferKey, LruCounter};
use crate::mpool::file::{
    DbMpoolFile, DbMpoolFileFlags, FileId, Ftype, MpoolFile, MpoolFileFlags, NameOp, PginFn, PgoutFn,
};
use crate::mpool::guard::{PageReadGuard, PageWriteGuard};
use crate::mpool::stats::MpoolStats;
use crate::recovery::LogCursor;
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// Which flush pass `sync_int` is being asked to run; mirrors the three
/// scopes a checkpoint/trickle/flush caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// Flush every dirty buffer belonging to one file.
    File(FileId),
    /// Flush every dirty buffer in the cache.
    Cache,
    /// Flush only enough buffers to bring the dirty fraction below a
    /// target percentage (the background trickle).
    Trickle(u8),
}

pub struct Mpool {
    slots: Vec<BufferHeader>,
    buckets: Vec<Bucket>,
    page_table: RwLock<HashMap<BufferKey, FrameId>>,
    free_list: parking_lot::Mutex<Vec<FrameId>>,
    files: RwLock<HashMap<FileId, Arc<MpoolFile>>>,
    hooks: RwLock<HashMap<Ftype, (PginFn, PgoutFn)>>,
    next_file_id: AtomicU32,
    lru: LruCounter,
    stats: MpoolStats,
    config: EnvConfig,
    /// Log cursor the pool flushes to at least a dirty page's LSN before
    /// writing it back, enforcing the WAL-before-data ordering guarantee.
    /// `None` for pools that never see logged pages (most tests, and any
    /// caller that hasn't wired in a log yet).
    log: Option<Arc<dyn LogCursor>>,
}

impl Mpool {
    pub fn new(config: EnvConfig) -> Self {
        assert!(config.pool_size > 0, "pool_size must be > 0");

        let slots: Vec<BufferHeader> = (0..config.pool_size).map(|_| BufferHeader::new()).collect();
        let free_list: Vec<FrameId> = (0..config.pool_size).map(FrameId::new).collect();
        let buckets: Vec<Bucket> = (0..config.nbuckets).map(|_| Bucket::new()).collect();

        Self {
            slots,
            buckets,
            page_table: RwLock::new(HashMap::new()),
            free_list: parking_lot::Mutex::new(free_list),
            files: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
            lru: LruCounter::new(),
            stats: MpoolStats::new(),
            config,
            log: None,
        }
    }

    /// Wires in the log whose tail must be flushed past a dirty page's
    /// LSN before that page is written back (§4.2.4's WAL ordering rule).
    pub fn with_log_cursor(mut self, log: Arc<dyn LogCursor>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn stats(&self) -> &MpoolStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    fn bucket_for(&self, key: BufferKey) -> &Bucket {
        let idx = bucket_hash(key.file_id.0, key.pgno.0, self.buckets.len());
        &self.buckets[idx]
    }

    // ------------------------------------------------------------------
    // memp_register / memp_nameop (§4.2.6 / §4.2.7)
    // ------------------------------------------------------------------

    /// Register a new file with the pool, opening (or creating) its
    /// backing disk manager. Returns a handle identifying it for future
    /// `fget`/`fput` calls.
    pub fn register_file(
        &self,
        path: PathBuf,
        page_size: usize,
        ftype: Ftype,
        flags: MpoolFileFlags,
        create: bool,
    ) -> Result<DbMpoolFile> {
        let disk = if create {
            DiskManager::create(&path)?
        } else {
            DiskManager::open_or_create(&path)?
        };

        let file_id = FileId::new(self.next_file_id.fetch_add(1, Ordering::AcqRel));
        debug!("registering {} as {file_id} (create={create})", path.display());
        let mf = Arc::new(MpoolFile::new(file_id, path, disk, page_size, ftype, flags));
        mf.incr_mpf_cnt();

        self.files.write().insert(file_id, mf);

        let mut handle_flags = DbMpoolFileFlags::empty();
        if flags.contains(MpoolFileFlags::READONLY) {
            handle_flags.insert(DbMpoolFileFlags::READONLY);
        }
        Ok(DbMpoolFile::new(file_id, handle_flags))
    }

    /// Register a page-in/page-out hook pair for a given page type. Must
    /// be called before any page of that type is faulted in.
    pub fn register_pgio(&self, ftype: Ftype, pgin: PginFn, pgout: PgoutFn) {
        self.hooks.write().insert(ftype, (pgin, pgout));
    }

    pub fn close_file(&self, handle: DbMpoolFile) -> Result<()> {
        let files = self.files.read();
        if let Some(mf) = files.get(&handle.file_id) {
            mf.decr_mpf_cnt();
        }
        Ok(())
    }

    /// Rename or remove a registered file. Marks the in-memory
    /// MPOOLFILE DEADFILE first so no further fget succeeds against it,
    /// then performs the filesystem operation.
    pub fn nameop(&self, file_id: FileId, op: NameOp, new_path: Option<PathBuf>) -> Result<()> {
        let mf = {
            let files = self.files.read();
            files.get(&file_id).cloned().ok_or_else(|| Error::not_found("no such mpoolfile"))?
        };

        mf.set_flag(MpoolFileFlags::DEADFILE);

        match op {
            NameOp::Rename => {
                let new_path = new_path.ok_or_else(|| Error::InvalidArg("rename needs a destination".into()))?;
                debug!("nameop: renaming {file_id} to {}", new_path.display());
                mf.rename(new_path)?;
            }
            NameOp::Remove => {
                debug!("nameop: removing {file_id} ({})", mf.path.display());
                std::fs::remove_file(&mf.path)?;
            }
        }

        self.invalidate_file(file_id);
        Ok(())
    }

    /// Drop every cached buffer belonging to a file (used after
    /// `nameop` and when a file's refcount drops to zero).
    fn invalidate_file(&self, file_id: FileId) {
        let victims: Vec<FrameId> = {
            let pt = self.page_table.read();
            pt.iter().filter(|(k, _)| k.file_id == file_id).map(|(_, &f)| f).collect()
        };
        for slot in victims {
            let key = self.slots[slot.0].key();
            if let Some(key) = key {
                self.bucket_for(key).remove(slot);
                self.page_table.write().remove(&key);
            }
            self.slots[slot.0].reset();
            self.free_list.lock().push(slot);
        }
    }

    // ------------------------------------------------------------------
    // fget / fput (§4.2.1 / §4.2.2)
    // ------------------------------------------------------------------

    pub fn fget_read(&self, file_id: FileId, pgno: PageId) -> Result<PageReadGuard<'_>> {
        let slot = self.fget_internal(file_id, pgno, false)?;
        let key = BufferKey::new(file_id, pgno);
        let lock = self.slots[slot.0].page();
        Ok(PageReadGuard::new(self, slot, key, lock))
    }

    pub fn fget_write(&self, file_id: FileId, pgno: PageId) -> Result<PageWriteGuard<'_>> {
        let slot = self.fget_internal(file_id, pgno, false)?;
        let key = BufferKey::new(file_id, pgno);
        let lock = self.slots[slot.0].page_mut();
        Ok(PageWriteGuard::new(self, slot, key, lock))
    }

    /// Allocate a brand-new page in `file_id` and pin it for writing.
    pub fn fget_new(&self, file_id: FileId) -> Result<PageWriteGuard<'_>> {
        let mf = self.file(file_id)?;
        if mf.is_dead() {
            return Err(Error::not_found("file is marked DEADFILE"));
        }
        let pgno = mf.allocate_raw()?;
        let slot = self.fget_internal(file_id, pgno, true)?;
        let key = BufferKey::new(file_id, pgno);
        self.slots[slot.0].page_mut().reset();
        self.slots[slot.0].insert_flag(BhFlags::DIRTY_CREATE);
        let lock = self.slots[slot.0].page_mut();
        Ok(PageWriteGuard::new(self, slot, key, lock))
    }

    fn file(&self, file_id: FileId) -> Result<Arc<MpoolFile>> {
        self.files
            .read()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| Error::not_found("no such mpoolfile"))
    }

    fn fget_internal(&self, file_id: FileId, pgno: PageId, just_allocated: bool) -> Result<FrameId> {
        let key = BufferKey::new(file_id, pgno);

        // Fast path: already cached. Spin a bounded number of times if
        // the buffer is mid-write-back (BH_LOCKED); beyond that we treat
        // it as a (rare) contended miss and fall through to re-check.
        for _ in 0..crate::common::config::FGET_SPIN_ROUNDS {
            let hit = {
                let pt = self.page_table.read();
                pt.get(&key).copied()
            };
            if let Some(slot) = hit {
                if self.slots[slot.0].is_locked() {
                    self.stats.lock_waits.fetch_add(1, Ordering::Relaxed);
                    trace!("fget: {file_id}/{pgno:?} mid-write-back, spinning");
                    std::thread::yield_now();
                    continue;
                }
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.pin_and_rank(slot);
                return Ok(slot);
            }
            break;
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        trace!("fget: {file_id}/{pgno:?} cache miss");

        let slot = self.get_free_slot()?;
        if !just_allocated {
            let mf = self.file(file_id)?;
            if mf.is_dead() {
                self.release_unused(slot);
                return Err(Error::not_found("file is marked DEADFILE"));
            }
            let page = mf.read_raw(pgno)?;
            self.stats.pages_read.fetch_add(1, Ordering::Relaxed);
            {
                let mut dst = self.slots[slot.0].page_mut();
                dst.as_mut_slice().copy_from_slice(page.as_slice());
            }
            if let Some((pgin, _)) = self.hooks.read().get(&mf.ftype).copied() {
                pgin(pgno, self.slots[slot.0].page_mut().as_mut_slice());
                self.slots[slot.0].insert_flag(BhFlags::CALLPGIN);
            }
            mf.incr_block_cnt();
        }

        self.slots[slot.0].set_key(Some(key));
        self.slots[slot.0].pin();
        self.slots[slot.0].set_priority(self.lru.next());

        self.bucket_for(key).insert(slot);
        self.page_table.write().insert(key, slot);

        Ok(slot)
    }

    fn pin_and_rank(&self, slot: FrameId) {
        self.slots[slot.0].pin();
        self.slots[slot.0].set_priority(self.lru.next());
    }

    /// Called by [`PageReadGuard`]/[`PageWriteGuard`] on drop.
    pub(crate) fn fput_internal(&self, slot: FrameId, is_dirty: bool) {
        let bh = &self.slots[slot.0];
        if is_dirty {
            bh.insert_flag(BhFlags::DIRTY);
            bh.set_priority(self.lru.next());
        }
        bh.unpin();
    }

    fn release_unused(&self, slot: FrameId) {
        self.slots[slot.0].reset();
        self.free_list.lock().push(slot);
    }

    // ------------------------------------------------------------------
    // memp_alloc (§4.2.3) — priority-bucket eviction sweep
    // ------------------------------------------------------------------

    fn get_free_slot(&self) -> Result<FrameId> {
        if let Some(slot) = self.free_list.lock().pop() {
            return Ok(slot);
        }
        self.evict_one()
    }

    /// Scan a bounded number of buckets (skipping a configurable
    /// fraction to spread contention) looking for the lowest-priority
    /// evictable buffer; write it back first if dirty.
    fn evict_one(&self) -> Result<FrameId> {
        let nbuckets = self.buckets.len();
        let skip = (nbuckets * EVICT_SKIP_PERCENT as usize) / 100;
        let scan_width = (EVICT_SCAN_WIDTH * nbuckets.max(1)).max(nbuckets);

        let mut best: Option<(u64, FrameId)> = None;

        for i in 0..scan_width.min(nbuckets * 2) {
            let idx = (skip + i) % nbuckets;
            for slot in self.buckets[idx].iter_snapshot() {
                let bh = &self.slots[slot.0];
                if !bh.is_evictable() {
                    continue;
                }
                let p = bh.priority();
                if best.map(|(bp, _)| p < bp).unwrap_or(true) {
                    best = Some((p, slot));
                }
            }
            if best.is_some() && i >= nbuckets {
                break;
            }
        }

        let (_, slot) = match best {
            Some(b) => b,
            None => {
                warn!("evict_one: no evictable buffer found after scanning {scan_width} buckets");
                return Err(Error::NoSpace);
            }
        };
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        debug!("evict_one: evicting slot {slot:?}");

        let key = self.slots[slot.0].key();
        if self.slots[slot.0].is_dirty() {
            self.stats.dirty_evictions.fetch_add(1, Ordering::Relaxed);
            self.write_back(slot)?;
        }

        if let Some(key) = key {
            self.bucket_for(key).remove(slot);
            self.page_table.write().remove(&key);
            if let Ok(mf) = self.file(key.file_id) {
                mf.decr_block_cnt();
            }
        }

        self.slots[slot.0].reset();
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // memp_bhwrite (§4.2.4)
    // ------------------------------------------------------------------

    /// Write one dirty buffer back to its file, applying the registered
    /// page-out hook first if the buffer was ever converted on read-in.
    fn write_back(&self, slot: FrameId) -> Result<()> {
        let key = self.slots[slot.0].key().ok_or_else(|| {
            log::error!("write_back: slot {slot:?} has no key, cache is corrupt");
            Error::panic("write_back on empty BH")
        })?;
        let mf = self.file(key.file_id)?;

        if mf.is_dead() {
            // DEADFILE: drop the write, the file is going away anyway.
            trace!("write_back: skipping {key:?}, file is DEADFILE");
            self.slots[slot.0].remove_flag(BhFlags::DIRTY);
            return Ok(());
        }
        trace!("write_back: flushing {key:?}");

        {
            let mut page = self.slots[slot.0].page_mut();
            if self.slots[slot.0].flags().contains(BhFlags::CALLPGIN) {
                if let Some((_, pgout)) = self.hooks.read().get(&mf.ftype).copied() {
                    pgout(key.pgno, page.as_mut_slice());
                }
            }
            page.update_checksum();
        }

        if let Some(log) = &self.log {
            let page_lsn = Lsn::from_u64(self.slots[slot.0].page().header().lsn);
            if page_lsn.is_valid() {
                trace!("write_back: flushing log to {page_lsn} before writing {key:?}");
                log.flush(page_lsn)?;
            }
        }

        let page = self.slots[slot.0].page();
        mf.write_raw(key.pgno, &page)?;
        drop(page);

        self.slots[slot.0].remove_flag(BhFlags::DIRTY);
        self.slots[slot.0].remove_flag(BhFlags::DIRTY_CREATE);
        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn flush_page(&self, file_id: FileId, pgno: PageId) -> Result<()> {
        let key = BufferKey::new(file_id, pgno);
        let slot = {
            let pt = self.page_table.read();
            pt.get(&key).copied()
        };
        if let Some(slot) = slot {
            if self.slots[slot.0].is_dirty() {
                self.write_back(slot)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // sync_int (§4.2.5)
    // ------------------------------------------------------------------

    /// Flush dirty buffers matching `scope`. Candidates are sorted by
    /// `(file, pgno)` first so the writes hit disk sequentially; a
    /// buffer still pinned is given a few rounds to drain before being
    /// counted as a `sync_wait` and skipped for this pass.
    pub fn sync_int(&self, scope: SyncScope) -> Result<usize> {
        let mut candidates: Vec<(BufferKey, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter()
                .filter(|(k, &s)| {
                    let dirty = self.slots[s.0].is_dirty();
                    let matches = match scope {
                        SyncScope::File(fid) => k.file_id == fid,
                        SyncScope::Cache => true,
                        SyncScope::Trickle(_) => true,
                    };
                    dirty && matches
                })
                .map(|(&k, &s)| (k, s))
                .collect()
        };
        candidates.sort_by_key(|(k, _)| (k.file_id.0, k.pgno.0));

        if let SyncScope::Trickle(target_pct) = scope {
            let total = self.slots.len().max(1);
            let dirty = candidates.len();
            let keep = (total * target_pct as usize) / 100;
            if dirty > keep {
                candidates.truncate(dirty - keep);
            } else {
                candidates.clear();
            }
        }

        let mut flushed = 0;
        for (_, slot) in candidates {
            let mut waited = 0;
            while self.slots[slot.0].ref_count() > 0 && waited < SYNC_WAIT_ROUNDS {
                self.stats.sync_waits.fetch_add(1, Ordering::Relaxed);
                std::thread::yield_now();
                waited += 1;
            }
            if self.slots[slot.0].is_dirty() {
                self.write_back(slot)?;
                flushed += 1;
            }
        }
        debug!("sync_int: {scope:?} flushed {flushed} buffer(s)");
        Ok(flushed)
    }

    pub fn flush_all(&self) -> Result<usize> {
        self.sync_int(SyncScope::Cache)
    }
}
