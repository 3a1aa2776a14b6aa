//! ARIES-style recovery: log records, a pluggable log cursor, the
//! recovery-time transaction list, and the three-pass driver.

pub mod driver;
pub mod log_cursor;
pub mod log_record;
pub mod txnlist;

pub use driver::{DispatchHandler, DispatchOp, FeedbackHook, NullFeedback, RecoveryDriver, RecoveryTarget};
pub use log_cursor::{InMemoryLog, LogCursor};
pub use log_record::{CheckpointInfo, LogRecord, RecordKind};
pub use txnlist::{TxnList, TxnState};
