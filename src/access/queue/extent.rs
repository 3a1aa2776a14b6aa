//! Extent array management (§4.7): a queue database's pages live in a
//! sequence of numbered extent files, extent `e` covering page numbers
//! `[e * page_ext + 1, (e+1) * page_ext]`. Two arrays (`array1`,
//! `array2`) let the handle's covered range grow in either direction
//! without shuffling already-open handles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::common::{Error, PageId, Result};
use crate::mpool::{DbMpoolFile, FileId, Mpool, MpoolFileFlags, PageReadGuard, PageWriteGuard, FTYPE_DEFAULT};

/// A contiguous run of open extent handles, indexed relative to `low`.
struct ExtentArray {
    low: u32,
    handles: Vec<Option<(FileId, DbMpoolFile)>>,
}

impl ExtentArray {
    fn empty() -> Self {
        Self { low: 0, handles: Vec::new() }
    }

    fn get(&self, extent: u32) -> Option<FileId> {
        if self.handles.is_empty() || extent < self.low {
            return None;
        }
        let idx = (extent - self.low) as usize;
        self.handles.get(idx).and_then(|h| h.as_ref()).map(|(id, _)| *id)
    }

    fn set(&mut self, extent: u32, file_id: FileId, handle: DbMpoolFile) {
        if self.handles.is_empty() {
            self.low = extent;
        }
        if extent < self.low {
            let shift = (self.low - extent) as usize;
            let mut grown = vec![None; shift];
            grown.append(&mut self.handles);
            self.handles = grown;
            self.low = extent;
        }
        let idx = (extent - self.low) as usize;
        if idx >= self.handles.len() {
            self.handles.resize_with(idx + 1, || None);
        }
        self.handles[idx] = Some((file_id, handle));
    }

    fn remove(&mut self, extent: u32) -> Option<(FileId, DbMpoolFile)> {
        if extent < self.low {
            return None;
        }
        let idx = (extent - self.low) as usize;
        self.handles.get_mut(idx).and_then(|slot| slot.take())
    }
}

/// The per-handle QUEUE struct: extent geometry plus the two growth
/// arrays. `array1` holds the lower range currently open, `array2` the
/// upper; most workloads only ever populate one.
pub struct QueueHandle {
    pub page_ext: u32,
    pub page_size: usize,
    base_path: PathBuf,
    mpool: Arc<Mpool>,
    array1: RwLock<ExtentArray>,
    array2: RwLock<ExtentArray>,
}

impl QueueHandle {
    pub fn new(base_path: impl Into<PathBuf>, page_ext: u32, page_size: usize, mpool: Arc<Mpool>) -> Self {
        Self {
            page_ext,
            page_size,
            base_path: base_path.into(),
            mpool,
            array1: RwLock::new(ExtentArray::empty()),
            array2: RwLock::new(ExtentArray::empty()),
        }
    }

    pub fn extent_for_pgno(&self, pgno: u32) -> u32 {
        pgno.saturating_sub(1) / self.page_ext.max(1)
    }

    fn extent_path(&self, extent: u32) -> PathBuf {
        let mut name = self.base_path.clone().into_os_string();
        name.push(format!(".{extent:03}"));
        PathBuf::from(name)
    }

    fn backup_path(&self, extent: u32) -> PathBuf {
        let mut name = self.base_path.clone().into_os_string();
        name.push(format!(".{extent:03}.bak"));
        PathBuf::from(name)
    }

    fn lookup(&self, extent: u32) -> Option<FileId> {
        self.array1.read().get(extent).or_else(|| self.array2.read().get(extent))
    }

    /// Opens (or registers, if this is the extent's first access) the
    /// mpool file backing `extent`.
    fn open_extent(&self, extent: u32) -> Result<FileId> {
        if let Some(id) = self.lookup(extent) {
            return Ok(id);
        }
        let path = self.extent_path(extent);
        let create = !path.exists();
        let handle = self
            .mpool
            .register_file(path, self.page_size, FTYPE_DEFAULT, MpoolFileFlags::empty(), create)?;
        let file_id = handle.file_id;

        if create {
            debug!("queue: creating extent {extent} ({} pages)", self.page_ext);
            // A fresh extent is fully pre-allocated so record pages can be
            // addressed by pgno without a separate extend step.
            for _ in 0..self.page_ext {
                self.mpool.fget_new(file_id)?;
            }
        }

        let mut a1 = self.array1.write();
        let adjacent_to_array1 = a1.handles.is_empty()
            || (extent + 1 >= a1.low && extent <= a1.low + a1.handles.len() as u32);
        if adjacent_to_array1 {
            a1.set(extent, file_id, handle);
        } else {
            drop(a1);
            self.array2.write().set(extent, file_id, handle);
        }
        Ok(file_id)
    }

    /// `qam_fget`: shim over mpool's `fget` that first resolves the
    /// owning extent file.
    pub fn qam_fget_read(&self, pgno: u32) -> Result<PageReadGuard<'_>> {
        let extent = self.extent_for_pgno(pgno);
        let file_id = self.open_extent(extent)?;
        let local_pgno = (pgno - 1) - extent * self.page_ext;
        self.mpool.fget_read(file_id, PageId::new(local_pgno))
    }

    pub fn qam_fget_write(&self, pgno: u32) -> Result<PageWriteGuard<'_>> {
        let extent = self.extent_for_pgno(pgno);
        let file_id = self.open_extent(extent)?;
        let local_pgno = (pgno - 1) - extent * self.page_ext;
        self.mpool.fget_write(file_id, PageId::new(local_pgno))
    }

    /// Renames an extent to its backup name, for a transaction that
    /// may need to restore it on abort.
    pub fn rename_to_backup(&self, extent: u32) -> Result<()> {
        let from = self.extent_path(extent);
        let to = self.backup_path(extent);
        std::fs::rename(from, to).map_err(Error::from)
    }

    /// Commit-time cleanup: unlink a backup left over from a prior
    /// `rename_to_backup`.
    pub fn unlink_backup(&self, extent: u32) -> Result<()> {
        let backup = self.backup_path(extent);
        if backup.exists() {
            std::fs::remove_file(backup)?;
        }
        Ok(())
    }

    /// Abort-time restore: move the backup back over the live extent.
    pub fn restore_from_backup(&self, extent: u32) -> Result<()> {
        let backup = self.backup_path(extent);
        let live = self.extent_path(extent);
        if backup.exists() {
            std::fs::rename(backup, live)?;
        }
        Ok(())
    }

    /// Removes an extent outright (no transaction active to back it up).
    pub fn remove_extent(&self, extent: u32) -> Result<()> {
        debug!("queue: removing extent {extent}");
        if let Some((file_id, handle)) = self.array1.write().remove(extent) {
            self.mpool.nameop(file_id, crate::mpool::NameOp::Remove, None)?;
            self.mpool.close_file(handle)?;
            return Ok(());
        }
        if let Some((file_id, handle)) = self.array2.write().remove(extent) {
            self.mpool.nameop(file_id, crate::mpool::NameOp::Remove, None)?;
            self.mpool.close_file(handle)?;
        }
        Ok(())
    }

    pub fn extents_on_disk(&self) -> Vec<u32> {
        let dir = self.base_path.parent().unwrap_or_else(|| Path::new("."));
        let prefix = self
            .base_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut found = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(rest) = name.strip_prefix(&format!("{prefix}.")) {
                    if let Ok(n) = rest.parse::<u32>() {
                        found.push(n);
                    }
                }
            }
        }
        found.sort_unstable();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::EnvConfig;

    fn make_handle(dir: &Path) -> QueueHandle {
        let mpool = Arc::new(Mpool::new(EnvConfig::new(16)));
        QueueHandle::new(dir.join("queue.db"), 4, 4096, mpool)
    }

    #[test]
    fn test_extent_for_pgno() {
        let dir = tempfile::tempdir().unwrap();
        let q = make_handle(dir.path());
        assert_eq!(q.extent_for_pgno(1), 0);
        assert_eq!(q.extent_for_pgno(4), 0);
        assert_eq!(q.extent_for_pgno(5), 1);
    }

    #[test]
    fn test_open_extent_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let q = make_handle(dir.path());
        let mut page = q.qam_fget_write(1).unwrap();
        page.as_mut_slice()[..10].copy_from_slice(&[7u8; 10]);
        drop(page);
        assert_eq!(q.extents_on_disk(), vec![0]);
    }

    #[test]
    fn test_sequential_extents_stay_in_array1() {
        let dir = tempfile::tempdir().unwrap();
        let q = make_handle(dir.path());
        q.open_extent(0).unwrap();
        q.open_extent(1).unwrap();
        q.open_extent(2).unwrap();
        assert_eq!(q.array1.read().handles.len(), 3);
        assert!(q.array2.read().handles.is_empty());
    }

    #[test]
    fn test_rename_and_restore_backup() {
        let dir = tempfile::tempdir().unwrap();
        let q = make_handle(dir.path());
        {
            let mut page = q.qam_fget_write(1).unwrap();
            page.as_mut_slice()[..4].copy_from_slice(&[1u8; 4]);
        }
        q.mpool.flush_all().unwrap();
        q.rename_to_backup(0).unwrap();
        assert!(!q.extent_path(0).exists());
        q.restore_from_backup(0).unwrap();
        assert!(q.extent_path(0).exists());
    }
}
