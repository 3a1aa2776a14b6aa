//! The minimal shape of a log record the recovery driver needs to
//! reason about: its own LSN, the previous LSN in its transaction's
//! chain, which transaction it belongs to, and an opaque payload the
//! access-method handlers decode for themselves.

use crate::common::Lsn;

/// Which transaction-lifecycle record a log entry represents, as far
/// as the driver itself cares (everything else is an "update" record
/// dispatched to a handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Begin,
    Commit,
    Abort,
    Checkpoint,
    Update(u32),
}

/// One entry in the write-ahead log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: u32,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn new(lsn: Lsn, prev_lsn: Lsn, txn_id: u32, kind: RecordKind, payload: Vec<u8>) -> Self {
        Self { lsn, prev_lsn, txn_id, kind, payload }
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self.kind, RecordKind::Checkpoint)
    }
}

/// Checkpoint-record specific fields, decoded out of `payload` when
/// `kind == Checkpoint`.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointInfo {
    pub ckp_lsn: Lsn,
    pub last_ckp: Lsn,
    pub timestamp: u64,
    pub max_txnid: u32,
}

impl CheckpointInfo {
    pub const SIZE: usize = 28;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.ckp_lsn.file.to_le_bytes());
        buf.extend_from_slice(&self.ckp_lsn.offset.to_le_bytes());
        buf.extend_from_slice(&self.last_ckp.file.to_le_bytes());
        buf.extend_from_slice(&self.last_ckp.offset.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.max_txnid.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        Some(Self {
            ckp_lsn: Lsn::new(u32_at(0), u32_at(4)),
            last_ckp: Lsn::new(u32_at(8), u32_at(12)),
            timestamp: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            max_txnid: u32_at(24),
        })
    }
}
