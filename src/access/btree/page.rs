//! A minimal in-memory B-tree page model: just enough structure for
//! the recovery handlers and recno search to manipulate without a full
//! on-disk B-tree implementation.

use crate::common::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Internal,
    Leaf,
}

/// One slot in a page: either a child pointer (internal) or a data
/// item (leaf), with book-keeping for recno-style record counting and
/// logical deletion.
#[derive(Debug, Clone)]
pub struct BtreeEntry {
    /// Child page number for internal entries; unused on leaves.
    pub child_pgno: u32,
    /// Number of records reachable under this entry, maintained by
    /// `bam_adjust` for internal entries.
    pub nrecs: u32,
    pub data: Vec<u8>,
    /// `B_DISSET` — logically deleted, skipped by recno search.
    pub deleted: bool,
}

impl BtreeEntry {
    pub fn leaf(data: Vec<u8>) -> Self {
        Self { child_pgno: 0, nrecs: 1, data, deleted: false }
    }

    pub fn internal(child_pgno: u32, nrecs: u32) -> Self {
        Self { child_pgno, nrecs, data: Vec::new(), deleted: false }
    }
}

#[derive(Debug, Clone)]
pub struct BtreePage {
    pub pgno: u32,
    pub role: PageRole,
    pub lsn: Lsn,
    pub entries: Vec<BtreeEntry>,
    pub next_pgno: u32,
    pub prev_pgno: u32,
}

impl BtreePage {
    pub fn new(pgno: u32, role: PageRole) -> Self {
        Self {
            pgno,
            role,
            lsn: Lsn::INVALID,
            entries: Vec::new(),
            next_pgno: 0,
            prev_pgno: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.role == PageRole::Leaf
    }

    /// `RE_NREC` for an internal root: total live records reachable
    /// below this page.
    pub fn total_nrecs(&self) -> u32 {
        if self.is_leaf() {
            self.entries.iter().filter(|e| !e.deleted).count() as u32
        } else {
            self.entries.iter().map(|e| e.nrecs).sum()
        }
    }
}

/// A handle to page storage the recovery handlers and search code
/// operate against. A real deployment backs this with `mpool`; tests
/// use a plain in-memory map.
pub trait PageStore: Send + Sync {
    fn fetch(&self, pgno: u32) -> Option<BtreePage>;
    fn put(&self, page: BtreePage);
    fn allocate(&self, role: PageRole) -> BtreePage;
}

pub struct InMemoryPageStore {
    pages: parking_lot::RwLock<std::collections::HashMap<u32, BtreePage>>,
    next_pgno: std::sync::atomic::AtomicU32,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self {
            pages: parking_lot::RwLock::new(std::collections::HashMap::new()),
            next_pgno: std::sync::atomic::AtomicU32::new(1),
        }
    }
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for InMemoryPageStore {
    fn fetch(&self, pgno: u32) -> Option<BtreePage> {
        self.pages.read().get(&pgno).cloned()
    }

    fn put(&self, page: BtreePage) {
        self.pages.write().insert(page.pgno, page);
    }

    fn allocate(&self, role: PageRole) -> BtreePage {
        let pgno = self.next_pgno.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let page = BtreePage::new(pgno, role);
        self.put(page.clone());
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_nrecs_leaf_skips_deleted() {
        let mut page = BtreePage::new(1, PageRole::Leaf);
        page.entries.push(BtreeEntry::leaf(vec![1]));
        page.entries.push(BtreeEntry { deleted: true, ..BtreeEntry::leaf(vec![2]) });
        assert_eq!(page.total_nrecs(), 1);
    }

    #[test]
    fn test_total_nrecs_internal_sums_children() {
        let mut page = BtreePage::new(1, PageRole::Internal);
        page.entries.push(BtreeEntry::internal(2, 5));
        page.entries.push(BtreeEntry::internal(3, 7));
        assert_eq!(page.total_nrecs(), 12);
    }

    #[test]
    fn test_store_allocate_and_fetch() {
        let store = InMemoryPageStore::new();
        let page = store.allocate(PageRole::Leaf);
        assert!(store.fetch(page.pgno).is_some());
    }
}
