//! The three-pass ARIES-style recovery driver (§4.4): find the
//! earliest useful LSN, replay OPENFILES to build the file registry,
//! undo backward, then redo forward.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error};

use crate::common::{Lsn, Result};

use super::log_cursor::LogCursor;
use super::log_record::{CheckpointInfo, LogRecord, RecordKind};
use super::txnlist::TxnList;

/// Which direction a record is being dispatched for, mirroring the
/// access-method handler's `op` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOp {
    OpenFiles,
    BackwardRoll,
    ForwardRoll,
}

/// An access-method recovery handler: decodes one record type and
/// applies (or undoes) its effect on the target page(s).
pub trait DispatchHandler: Send + Sync {
    fn dispatch(
        &self,
        record: &LogRecord,
        op: DispatchOp,
        txnlist: &mut TxnList,
    ) -> Result<()>;
}

/// Reports coarse recovery progress back to the embedding application.
pub trait FeedbackHook: Send + Sync {
    fn progress(&self, percent: u8);
}

/// A no-op hook for callers that don't care about progress reporting.
pub struct NullFeedback;

impl FeedbackHook for NullFeedback {
    fn progress(&self, _percent: u8) {}
}

/// How far to recover: all the way, or stop at a specific point.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryTarget {
    pub max_lsn: Option<Lsn>,
    pub recover_to_time: Option<u64>,
    pub catastrophic: bool,
}

pub struct RecoveryDriver {
    log: Arc<dyn LogCursor>,
    handlers: HashMap<u32, Arc<dyn DispatchHandler>>,
    feedback: Arc<dyn FeedbackHook>,
}

impl RecoveryDriver {
    pub fn new(log: Arc<dyn LogCursor>) -> Self {
        Self { log, handlers: HashMap::new(), feedback: Arc::new(NullFeedback) }
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackHook>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn register_handler(&mut self, rectype: u32, handler: Arc<dyn DispatchHandler>) {
        self.handlers.insert(rectype, handler);
    }

    fn handler_for(&self, record: &LogRecord) -> Option<&Arc<dyn DispatchHandler>> {
        match record.kind {
            RecordKind::Update(rectype) => self.handlers.get(&rectype),
            _ => None,
        }
    }

    /// Pass 0: locate the earliest LSN worth starting the OPENFILES
    /// pass from.
    fn find_open_files_lsn(&self, target: &RecoveryTarget) -> Lsn {
        let first = self.log.first().map(|r| r.lsn).unwrap_or(Lsn::INVALID);

        let mut start = first;
        if !target.catastrophic {
            if let Some(ckp) = self.latest_checkpoint_ckp_lsn() {
                start = ckp;
            }
        }

        if let Some(t) = target.recover_to_time {
            if let Some(lsn) = self.checkpoint_at_or_before_time(first, t) {
                if lsn < start {
                    start = lsn;
                }
            }
        }

        if let Some(max_lsn) = target.max_lsn {
            if let Some(lsn) = self.checkpoint_chain_before(max_lsn) {
                start = lsn;
            }
        }

        start
    }

    fn latest_checkpoint_ckp_lsn(&self) -> Option<Lsn> {
        let mut cur = self.log.last()?;
        loop {
            if cur.is_checkpoint() {
                return Some(cur.prev_lsn);
            }
            cur = self.log.prev(cur.lsn)?;
        }
    }

    /// Scans backward from the log tail for the most recent checkpoint
    /// whose recorded timestamp is at or before `t`, decoding each
    /// checkpoint's payload as a `CheckpointInfo`. Checkpoints with an
    /// undecodable or too-late payload are skipped rather than treated
    /// as a hard stop, so a single corrupt/foreign checkpoint record
    /// doesn't block an otherwise-satisfiable override.
    fn checkpoint_at_or_before_time(&self, from: Lsn, t: u64) -> Option<Lsn> {
        let mut cur = self.log.last()?;
        loop {
            if cur.lsn < from {
                return None;
            }
            if cur.is_checkpoint() {
                if let Some(info) = CheckpointInfo::decode(&cur.payload) {
                    if info.timestamp <= t {
                        return Some(info.ckp_lsn);
                    }
                }
            }
            cur = self.log.prev(cur.lsn)?;
        }
    }

    fn checkpoint_chain_before(&self, max_lsn: Lsn) -> Option<Lsn> {
        let mut cur = self.log.set(max_lsn).or_else(|| self.log.prev(max_lsn))?;
        loop {
            if cur.is_checkpoint() && cur.lsn <= max_lsn {
                return Some(cur.prev_lsn);
            }
            cur = self.log.prev(cur.lsn)?;
        }
    }

    /// Runs all three passes and returns the final transaction list
    /// (maxid, checkpoint bookkeeping) for the caller to persist.
    pub fn run(&self, target: RecoveryTarget) -> Result<TxnList> {
        let mut txnlist = TxnList::new();

        let open_files_lsn = self.find_open_files_lsn(&target);
        let last_lsn = self.log.last().map(|r| r.lsn).unwrap_or(open_files_lsn);
        debug!("recovery: starting at {open_files_lsn:?}, log tail at {last_lsn:?}");

        // Pass 1: OPENFILES
        self.scan_forward(open_files_lsn, last_lsn, DispatchOp::OpenFiles, &mut txnlist)?;
        self.feedback.progress(33);
        debug!("recovery: OPENFILES pass complete, maxid {}", txnlist.maxid);

        // Pass 2: BACKWARD_ROLL
        let first_lsn = open_files_lsn;
        self.scan_backward(last_lsn, first_lsn, &mut txnlist)?;
        self.feedback.progress(66);
        debug!("recovery: BACKWARD_ROLL pass complete");

        // Pass 3: FORWARD_ROLL
        let stop_lsn = target.max_lsn.unwrap_or(last_lsn);
        self.scan_forward(first_lsn, stop_lsn, DispatchOp::ForwardRoll, &mut txnlist)?;
        self.feedback.progress(100);
        debug!("recovery: FORWARD_ROLL pass complete");

        Ok(txnlist)
    }

    fn scan_forward(
        &self,
        from: Lsn,
        to: Lsn,
        op: DispatchOp,
        txnlist: &mut TxnList,
    ) -> Result<()> {
        let mut cur = self.log.set(from).or_else(|| self.log.next(Lsn::INVALID));
        while let Some(record) = cur {
            if record.lsn > to {
                break;
            }
            self.apply_transaction_bookkeeping(&record, txnlist);
            if let Some(handler) = self.handler_for(&record) {
                if op == DispatchOp::ForwardRoll && txnlist.needs_undo(record.txn_id) {
                    // skip: transaction never committed
                } else if let Err(e) = handler.dispatch(&record, op, txnlist) {
                    error!("recovery: dispatch failed at {:?} ({op:?}): {e}", record.lsn);
                    return Err(e);
                }
            }
            cur = self.log.next(record.lsn);
        }
        Ok(())
    }

    fn scan_backward(&self, from: Lsn, to: Lsn, txnlist: &mut TxnList) -> Result<()> {
        let mut cur = self.log.set(from).or_else(|| self.log.last());
        while let Some(record) = cur {
            if record.lsn < to {
                break;
            }
            if record.is_checkpoint() {
                // checkpoints are not fatal here; just keep scanning.
                cur = self.log.prev(record.lsn);
                continue;
            }
            if let Some(handler) = self.handler_for(&record) {
                if txnlist.needs_undo(record.txn_id) {
                    if let Err(e) = handler.dispatch(&record, DispatchOp::BackwardRoll, txnlist) {
                        error!("recovery: undo failed at {:?}: {e}", record.lsn);
                        return Err(e);
                    }
                }
            }
            if record.lsn == to {
                break;
            }
            cur = self.log.prev(record.lsn);
        }
        Ok(())
    }

    fn apply_transaction_bookkeeping(&self, record: &LogRecord, txnlist: &mut TxnList) {
        match record.kind {
            RecordKind::Begin | RecordKind::Update(_) => txnlist.note_seen(record.txn_id),
            RecordKind::Commit => txnlist.mark_committed(record.txn_id),
            RecordKind::Abort => txnlist.mark_aborted(record.txn_id),
            RecordKind::Checkpoint => txnlist.note_checkpoint(record.prev_lsn, record.lsn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::log_cursor::InMemoryLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        redo_count: AtomicUsize,
        undo_count: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Self {
            Self { redo_count: AtomicUsize::new(0), undo_count: AtomicUsize::new(0) }
        }
    }

    impl DispatchHandler for CountingHandler {
        fn dispatch(&self, _record: &LogRecord, op: DispatchOp, _txnlist: &mut TxnList) -> Result<()> {
            match op {
                DispatchOp::ForwardRoll => {
                    self.redo_count.fetch_add(1, Ordering::Relaxed);
                }
                DispatchOp::BackwardRoll => {
                    self.undo_count.fetch_add(1, Ordering::Relaxed);
                }
                DispatchOp::OpenFiles => {}
            }
            Ok(())
        }
    }

    fn rec(offset: u32, prev: u32, txn: u32, kind: RecordKind) -> LogRecord {
        LogRecord::new(
            Lsn::new(1, offset),
            if prev == 0 { Lsn::INVALID } else { Lsn::new(1, prev) },
            txn,
            kind,
            vec![],
        )
    }

    #[test]
    fn test_committed_txn_is_redone_not_undone() {
        let log = Arc::new(InMemoryLog::new());
        log.append(rec(10, 0, 1, RecordKind::Begin));
        log.append(rec(20, 10, 1, RecordKind::Update(7)));
        log.append(rec(30, 20, 1, RecordKind::Commit));

        let handler = Arc::new(CountingHandler::new());
        let mut driver = RecoveryDriver::new(log);
        driver.register_handler(7, handler.clone());

        driver.run(RecoveryTarget::default()).unwrap();
        assert_eq!(handler.redo_count.load(Ordering::Relaxed), 1);
        assert_eq!(handler.undo_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_uncommitted_txn_is_undone_not_redone() {
        let log = Arc::new(InMemoryLog::new());
        log.append(rec(10, 0, 2, RecordKind::Begin));
        log.append(rec(20, 10, 2, RecordKind::Update(7)));

        let handler = Arc::new(CountingHandler::new());
        let mut driver = RecoveryDriver::new(log);
        driver.register_handler(7, handler.clone());

        driver.run(RecoveryTarget::default()).unwrap();
        assert_eq!(handler.undo_count.load(Ordering::Relaxed), 1);
        assert_eq!(handler.redo_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_checkpoint_record_does_not_abort_backward_pass() {
        let log = Arc::new(InMemoryLog::new());
        log.append(rec(10, 0, 1, RecordKind::Begin));
        log.append(rec(15, 10, 0, RecordKind::Checkpoint));
        log.append(rec(20, 15, 1, RecordKind::Update(7)));
        log.append(rec(30, 20, 1, RecordKind::Commit));

        let handler = Arc::new(CountingHandler::new());
        let mut driver = RecoveryDriver::new(log);
        driver.register_handler(7, handler.clone());

        let txnlist = driver.run(RecoveryTarget::default()).unwrap();
        assert!(txnlist.is_committed(1));
    }

    fn ckp_rec(offset: u32, prev: u32, info: CheckpointInfo) -> LogRecord {
        LogRecord::new(
            Lsn::new(1, offset),
            if prev == 0 { Lsn::INVALID } else { Lsn::new(1, prev) },
            0,
            RecordKind::Checkpoint,
            info.encode(),
        )
    }

    #[test]
    fn test_checkpoint_at_or_before_time_honors_the_override() {
        let log = Arc::new(InMemoryLog::new());
        let early = CheckpointInfo {
            ckp_lsn: Lsn::new(1, 5),
            last_ckp: Lsn::INVALID,
            timestamp: 100,
            max_txnid: 1,
        };
        let late = CheckpointInfo {
            ckp_lsn: Lsn::new(1, 35),
            last_ckp: Lsn::new(1, 10),
            timestamp: 200,
            max_txnid: 2,
        };
        log.append(ckp_rec(10, 0, early));
        log.append(ckp_rec(40, 10, late));

        let driver = RecoveryDriver::new(log);

        assert_eq!(
            driver.checkpoint_at_or_before_time(Lsn::new(1, 1), 150),
            Some(Lsn::new(1, 5))
        );
        assert_eq!(
            driver.checkpoint_at_or_before_time(Lsn::new(1, 1), 250),
            Some(Lsn::new(1, 35))
        );
        assert_eq!(driver.checkpoint_at_or_before_time(Lsn::new(1, 1), 50), None);
    }

    #[test]
    fn test_recover_to_time_narrows_the_recovery_start() {
        let log = Arc::new(InMemoryLog::new());
        log.append(rec(10, 0, 1, RecordKind::Begin));
        log.append(rec(20, 10, 1, RecordKind::Update(7)));
        log.append(rec(30, 20, 1, RecordKind::Commit));
        log.append(ckp_rec(
            40,
            30,
            CheckpointInfo {
                ckp_lsn: Lsn::new(1, 10),
                last_ckp: Lsn::INVALID,
                timestamp: 1000,
                max_txnid: 1,
            },
        ));
        log.append(rec(50, 0, 2, RecordKind::Begin));
        log.append(rec(60, 50, 2, RecordKind::Update(7)));
        log.append(rec(70, 60, 2, RecordKind::Commit));

        let handler = Arc::new(CountingHandler::new());
        let mut driver = RecoveryDriver::new(log);
        driver.register_handler(7, handler.clone());

        let target = RecoveryTarget { recover_to_time: Some(1000), ..Default::default() };
        let txnlist = driver.run(target).unwrap();

        assert!(txnlist.is_committed(1));
        assert!(txnlist.is_committed(2));
        assert_eq!(handler.redo_count.load(Ordering::Relaxed), 2);
    }
}
