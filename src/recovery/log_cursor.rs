//! Log cursor abstraction (§6.1): `first`/`next`/`prev`/`last`/`set`
//! for scanning, plus `flush`/`vtruncate` for the durability and
//! destructive-shortening operations the buffer pool and recovery
//! driver need. Kept as a trait so recovery can be tested against an
//! in-memory log instead of a real on-disk WAL.

use crate::common::{Lsn, Result};

use super::log_record::LogRecord;

pub trait LogCursor: Send + Sync {
    fn first(&self) -> Option<LogRecord>;
    fn next(&self, after: Lsn) -> Option<LogRecord>;
    fn prev(&self, before: Lsn) -> Option<LogRecord>;
    fn last(&self) -> Option<LogRecord>;
    fn set(&self, lsn: Lsn) -> Option<LogRecord>;

    /// Blocks until the log is durable through `lsn`.
    fn flush(&self, lsn: Lsn) -> Result<()>;

    /// Destructively shortens the log, keeping `ckp_lsn` onward and
    /// recording `trunclsn` as the new tail.
    fn vtruncate(&self, ckp_lsn: Lsn, trunclsn: Lsn) -> Result<()>;
}

/// A `Vec`-backed log for tests and for small embedded deployments
/// that don't need a separate on-disk WAL file.
pub struct InMemoryLog {
    records: parking_lot::RwLock<Vec<LogRecord>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self { records: parking_lot::RwLock::new(Vec::new()) }
    }

    pub fn append(&self, record: LogRecord) {
        self.records.write().push(record);
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCursor for InMemoryLog {
    fn first(&self) -> Option<LogRecord> {
        self.records.read().first().cloned()
    }

    fn next(&self, after: Lsn) -> Option<LogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.lsn > after)
            .min_by_key(|r| r.lsn)
            .cloned()
    }

    fn prev(&self, before: Lsn) -> Option<LogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.lsn < before)
            .max_by_key(|r| r.lsn)
            .cloned()
    }

    fn last(&self) -> Option<LogRecord> {
        self.records.read().iter().max_by_key(|r| r.lsn).cloned()
    }

    fn set(&self, lsn: Lsn) -> Option<LogRecord> {
        self.records.read().iter().find(|r| r.lsn == lsn).cloned()
    }

    fn flush(&self, _lsn: Lsn) -> Result<()> {
        Ok(())
    }

    fn vtruncate(&self, ckp_lsn: Lsn, _trunclsn: Lsn) -> Result<()> {
        self.records.write().retain(|r| r.lsn >= ckp_lsn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::log_record::RecordKind;

    fn rec(file: u32, offset: u32, prev: Lsn) -> LogRecord {
        LogRecord::new(Lsn::new(file, offset), prev, 1, RecordKind::Update(1), vec![])
    }

    #[test]
    fn test_first_last_order() {
        let log = InMemoryLog::new();
        log.append(rec(1, 10, Lsn::INVALID));
        log.append(rec(1, 20, Lsn::new(1, 10)));
        assert_eq!(log.first().unwrap().lsn, Lsn::new(1, 10));
        assert_eq!(log.last().unwrap().lsn, Lsn::new(1, 20));
    }

    #[test]
    fn test_next_prev_scan() {
        let log = InMemoryLog::new();
        log.append(rec(1, 10, Lsn::INVALID));
        log.append(rec(1, 20, Lsn::new(1, 10)));
        log.append(rec(1, 30, Lsn::new(1, 20)));
        assert_eq!(log.next(Lsn::new(1, 10)).unwrap().lsn, Lsn::new(1, 20));
        assert_eq!(log.prev(Lsn::new(1, 30)).unwrap().lsn, Lsn::new(1, 20));
    }

    #[test]
    fn test_vtruncate_keeps_tail() {
        let log = InMemoryLog::new();
        log.append(rec(1, 10, Lsn::INVALID));
        log.append(rec(1, 20, Lsn::new(1, 10)));
        log.vtruncate(Lsn::new(1, 20), Lsn::new(1, 20)).unwrap();
        assert!(log.set(Lsn::new(1, 10)).is_none());
        assert!(log.set(Lsn::new(1, 20)).is_some());
    }
}
