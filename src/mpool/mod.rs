//! mpool — the shared-memory buffer pool: a multi-file, priority-evicting cache.
//!
//! - [`file`] — MPOOLFILE / DB_MPOOLFILE, per-file and per-handle state
//! - [`buffer_header`] — BH, the cached-page-plus-metadata unit
//! - [`bucket`] — DB_MPOOL_HASH, the priority-ordered hash bucket
//! - [`guard`] — RAII pinned-page handles returned by `fget`
//! - [`stats`] — pool-wide counters
//! - [`cache`] — the manager: fget/fput/alloc/write-back/sync/register

pub mod bucket;
pub mod buffer_header;
pub mod cache;
pub mod file;
pub mod guard;
pub mod stats;

pub use buffer_header::{BhFlags, BufferHeader, BufferKey, LruCounter};
pub use cache::Mpool;
pub use file::{DbMpoolFile, DbMpoolFileFlags, FileId, Ftype, MpoolFile, MpoolFileFlags, NameOp, FTYPE_DEFAULT};
pub use guard::{PageReadGuard, PageWriteGuard};
pub use stats::{MpoolStats, MpoolStatsSnapshot};
