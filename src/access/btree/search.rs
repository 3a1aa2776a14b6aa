//! Recno-aware search (`bt_rsearch`, §4.6): locate the leaf entry for
//! a record number, descending through internal pages by summing
//! child record counts, plus the companion record-count maintenance
//! (`bam_adjust`/`bam_total`).

use crate::common::{Error, Result};

use super::page::{PageRole, PageStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAction {
    Read,
    Write,
    /// Keep every page on the descent path, for callers that will
    /// mutate the tree (split, delete, adjust) and need to walk back up.
    Stack,
    Append,
    PastEof,
    Parent,
}

/// Result of a successful `bt_rsearch`: which leaf and slot hold the
/// record, and (for `Stack`/`Write` actions) the full descent path for
/// `bam_adjust` to walk afterward.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub leaf_pgno: u32,
    pub index: usize,
    pub recno: u32,
    pub stack: Vec<u32>,
}

/// `bam_total`: total live record count reachable from `pgno`.
pub fn bam_total(store: &dyn PageStore, pgno: u32) -> Result<u32> {
    let page = store.fetch(pgno).ok_or_else(|| Error::not_found(format!("page {pgno}")))?;
    Ok(page.total_nrecs())
}

/// `bt_rsearch`: locate the entry for `recno` under `root`.
pub fn bt_rsearch(
    store: &dyn PageStore,
    root: u32,
    recno: u32,
    action: SearchAction,
) -> Result<SearchResult> {
    let total = bam_total(store, root)?;

    let recno = if action == SearchAction::Append {
        total + 1
    } else {
        let limit = if action == SearchAction::PastEof { total + 1 } else { total };
        if recno > limit || recno == 0 {
            return Err(Error::not_found(format!("recno {recno} out of range (total {total})")));
        }
        recno
    };

    let want_stack = matches!(action, SearchAction::Write | SearchAction::Stack | SearchAction::Append);
    let mut stack = Vec::new();
    let mut current = root;
    let mut remaining = recno;

    loop {
        let page = store.fetch(current).ok_or_else(|| Error::not_found(format!("page {current}")))?;
        if want_stack {
            stack.push(current);
        }

        if page.role == PageRole::Leaf {
            if action == SearchAction::Append {
                return Ok(SearchResult {
                    leaf_pgno: current,
                    index: page.entries.len(),
                    recno,
                    stack,
                });
            }

            let mut live_seen = 0u32;
            for (idx, entry) in page.entries.iter().enumerate() {
                if entry.deleted {
                    continue;
                }
                live_seen += 1;
                if live_seen == remaining {
                    return Ok(SearchResult { leaf_pgno: current, index: idx, recno, stack });
                }
            }
            return Err(Error::not_found(format!("recno {recno} not present on leaf {current}")));
        }

        if action == SearchAction::Parent && page.entries.iter().all(|e| {
            store.fetch(e.child_pgno).map(|c| c.is_leaf()).unwrap_or(false)
        }) {
            return Ok(SearchResult { leaf_pgno: current, index: 0, recno, stack });
        }

        let mut accumulated = 0u32;
        let mut descended = false;
        for entry in &page.entries {
            if remaining <= accumulated + entry.nrecs {
                remaining -= accumulated;
                current = entry.child_pgno;
                descended = true;
                break;
            }
            accumulated += entry.nrecs;
        }
        if !descended {
            return Err(Error::not_found(format!("recno {recno} not covered by page {current}")));
        }
    }
}

/// `bam_adjust`: apply `delta` to the child-record-count of every
/// internal node on `stack` that points at the next page down, and to
/// the root if `update_root` is set (mirroring `CAD_UPDATEROOT`).
pub fn bam_adjust(store: &dyn PageStore, stack: &[u32], delta: i32, update_root: bool) -> Result<()> {
    for window in stack.windows(2) {
        let (parent_pgno, child_pgno) = (window[0], window[1]);
        let mut parent = store.fetch(parent_pgno).ok_or_else(|| Error::not_found(format!("page {parent_pgno}")))?;
        if let Some(entry) = parent.entries.iter_mut().find(|e| e.child_pgno == child_pgno) {
            entry.nrecs = (entry.nrecs as i64 + delta as i64).max(0) as u32;
        }
        store.put(parent);
    }

    if update_root {
        if let Some(&root_pgno) = stack.first() {
            // The root's own total is derived from its children, which
            // were just updated above; nothing further to persist here
            // beyond what the loop already wrote.
            let _ = root_pgno;
        }
    }
    Ok(())
}
