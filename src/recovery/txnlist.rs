//! The recovery-time in-memory record of every transaction seen while
//! scanning the log (§3.5).

use std::collections::HashMap;

use crate::common::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Seen,
    Committed,
    Aborted,
}

#[derive(Debug, Default)]
pub struct TxnList {
    pub maxid: u32,
    pub ckp_lsn: Lsn,
    pub maxlsn: Lsn,
    entries: HashMap<u32, TxnState>,
}

impl TxnList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_seen(&mut self, txn_id: u32) {
        self.entries.entry(txn_id).or_insert(TxnState::Seen);
        self.maxid = self.maxid.max(txn_id);
    }

    pub fn mark_committed(&mut self, txn_id: u32) {
        self.entries.insert(txn_id, TxnState::Committed);
    }

    pub fn mark_aborted(&mut self, txn_id: u32) {
        self.entries.insert(txn_id, TxnState::Aborted);
    }

    pub fn state(&self, txn_id: u32) -> Option<TxnState> {
        self.entries.get(&txn_id).copied()
    }

    pub fn is_committed(&self, txn_id: u32) -> bool {
        self.state(txn_id) == Some(TxnState::Committed)
    }

    /// Whether `txn_id`'s effects should be undone: it never committed
    /// (we only ever saw BEGIN/updates for it, or an explicit abort).
    pub fn needs_undo(&self, txn_id: u32) -> bool {
        !matches!(self.state(txn_id), Some(TxnState::Committed))
    }

    pub fn note_checkpoint(&mut self, ckp_lsn: Lsn, at: Lsn) {
        self.ckp_lsn = ckp_lsn;
        self.maxlsn = self.maxlsn.max(at);
    }
}
