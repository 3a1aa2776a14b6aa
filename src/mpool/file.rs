//! MPOOLFILE / DB_MPOOLFILE — the per-file and per-handle state the
//! buffer pool keeps for every registered file.
//!
//! A registry of files the pool can fget/fput pages against, each
//! backed by its own [`DiskManager`](crate::storage::DiskManager) and
//! carrying its own page-in/page-out hook and lifecycle flags.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::macros::bitflags_lite;
use crate::common::{Error, PageId, Result};
use crate::storage::DiskManager;

/// Unique id assigned to a file when it is first opened/created through
/// the pool, standing in for a `(fileid, path)` identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    pub fn new(id: u32) -> Self {
        FileId(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.0)
    }
}

bitflags_lite! {
    /// MPOOLFILE-level flags.
    pub struct MpoolFileFlags: u16 {
        const TEMP      = 0b0000_0001;
        const DEADFILE  = 0b0000_0010;
        const EXTENT    = 0b0000_0100;
        const READONLY  = 0b0000_1000;
        const CAN_MMAP  = 0b0001_0000;
        const DIRECT    = 0b0010_0000;
    }
}

/// Page type tag used to look up a registered pgin/pgout hook pair. `0`
/// is the reserved access-method slot installed at environment-create
/// time and never re-registered.
pub type Ftype = u32;

pub const FTYPE_DEFAULT: Ftype = 0;

/// Page-in / page-out conversion hooks: translate between on-disk and
/// in-memory page representation (checksums, byte-swapping, crypto).
pub type PginFn = fn(pgno: PageId, buf: &mut [u8]);
pub type PgoutFn = fn(pgno: PageId, buf: &mut [u8]);

/// Shared per-file descriptor. One per underlying file, regardless of
/// how many process-local handles ([`DbMpoolFile`]) reference it.
pub struct MpoolFile {
    pub file_id: FileId,
    pub path: PathBuf,
    pub page_size: usize,
    /// Bytes to zero-fill in a page extended past EOF.
    pub clear_len: usize,
    pub ftype: Ftype,
    /// Offset of the LSN field within a page body; `None` if this file's
    /// pages aren't logged (e.g. temporary).
    pub lsn_off: Option<usize>,

    last_pgno: AtomicU32,
    /// `last_pgno` as of the mmap snapshot; unused beyond bookkeeping
    /// since the mmap return path is never taken (see DESIGN.md).
    pub orig_last_pgno: AtomicU32,

    /// Number of open `DbMpoolFile` handles.
    mpf_cnt: AtomicU32,
    /// Number of BHs in the cache referencing this file.
    block_cnt: AtomicU32,

    flags: Mutex<MpoolFileFlags>,
    disk: Mutex<DiskManager>,
}

impl MpoolFile {
    pub fn new(
        file_id: FileId,
        path: PathBuf,
        disk: DiskManager,
        page_size: usize,
        ftype: Ftype,
        flags: MpoolFileFlags,
    ) -> Self {
        let last_pgno = disk.page_count().saturating_sub(1);
        Self {
            file_id,
            path,
            page_size,
            clear_len: page_size,
            ftype,
            lsn_off: Some(crate::storage::page::PageHeader::OFFSET_LSN),
            last_pgno: AtomicU32::new(last_pgno),
            orig_last_pgno: AtomicU32::new(last_pgno),
            mpf_cnt: AtomicU32::new(0),
            block_cnt: AtomicU32::new(0),
            flags: Mutex::new(flags),
            disk: Mutex::new(disk),
        }
    }

    pub fn last_pgno(&self) -> u32 {
        self.last_pgno.load(Ordering::Acquire)
    }

    pub fn bump_last_pgno(&self) -> u32 {
        self.last_pgno.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn page_count(&self) -> u32 {
        self.last_pgno().wrapping_add(1)
    }

    pub fn incr_mpf_cnt(&self) -> u32 {
        self.mpf_cnt.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decr_mpf_cnt(&self) -> u32 {
        let old = self.mpf_cnt.fetch_sub(1, Ordering::AcqRel);
        old.saturating_sub(1)
    }

    pub fn mpf_cnt(&self) -> u32 {
        self.mpf_cnt.load(Ordering::Acquire)
    }

    pub fn incr_block_cnt(&self) -> u32 {
        self.block_cnt.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decr_block_cnt(&self) -> u32 {
        let old = self.block_cnt.fetch_sub(1, Ordering::AcqRel);
        old.saturating_sub(1)
    }

    pub fn block_cnt(&self) -> u32 {
        self.block_cnt.load(Ordering::Acquire)
    }

    /// True once `mpf_cnt == 0 && block_cnt == 0`: the last reason to
    /// keep this MPOOLFILE alive has gone away.
    pub fn is_discardable(&self) -> bool {
        self.mpf_cnt() == 0 && self.block_cnt() == 0
    }

    pub fn flags(&self) -> MpoolFileFlags {
        *self.flags.lock()
    }

    pub fn set_flag(&self, flag: MpoolFileFlags) {
        self.flags.lock().insert(flag);
    }

    pub fn clear_flag(&self, flag: MpoolFileFlags) {
        self.flags.lock().remove(flag);
    }

    pub fn is_dead(&self) -> bool {
        self.flags().contains(MpoolFileFlags::DEADFILE)
    }

    pub fn is_extent(&self) -> bool {
        self.flags().contains(MpoolFileFlags::EXTENT)
    }

    pub fn read_raw(&self, pgno: PageId) -> Result<crate::storage::page::Page> {
        self.disk.lock().read_page(pgno)
    }

    pub fn write_raw(&self, pgno: PageId, page: &crate::storage::page::Page) -> Result<()> {
        self.disk.lock().write_page(pgno, page)
    }

    pub fn allocate_raw(&self) -> Result<PageId> {
        let pgno = self.disk.lock().allocate_page()?;
        self.bump_last_pgno();
        Ok(pgno)
    }

    pub fn fsync(&self) -> Result<()> {
        self.disk.lock().sync()
    }

    /// Rename the backing file. The mpool region lock is expected to be
    /// held by the caller (see `memp_nameop`).
    pub fn rename(&self, new_path: PathBuf) -> Result<()> {
        std::fs::rename(&self.path, &new_path)?;
        Ok(())
    }
}

/// A process-local handle onto an [`MpoolFile`]. Carries handle-scoped
/// flags distinct from the shared file's own flags.
pub struct DbMpoolFile {
    pub file_id: FileId,
    pub flags: DbMpoolFileFlags,
}

bitflags_lite! {
    pub struct DbMpoolFileFlags: u8 {
        const READONLY     = 0b0000_0001;
        const UPGRADE      = 0b0000_0010;
        const UPGRADE_FAIL = 0b0000_0100;
        const FLUSH        = 0b0000_1000;
        const MP_FLUSH     = 0b0001_0000;
    }
}

impl DbMpoolFile {
    pub fn new(file_id: FileId, flags: DbMpoolFileFlags) -> Self {
        Self { file_id, flags }
    }
}

/// What `memp_nameop` should do to matching MPOOLFILEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOp {
    Rename,
    Remove,
}

pub(crate) fn perm_error(path: &std::path::Path) -> Error {
    Error::perm(format!("cannot upgrade read-only handle for {}", path.display()))
}
