//! Error types shared by every subsystem.

use thiserror::Error;

/// Convenient Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the storage engine core can raise.
///
/// Each variant corresponds to one of the error kinds the core is
/// specified to use. `Panic` is sticky: once raised, an environment
/// should be treated as unusable until closed and reopened.
#[derive(Debug, Error)]
pub enum Error {
    /// Unrecoverable environment-wide failure. Every future call on the
    /// same environment should fail fast with the same condition.
    #[error("environment panic: {0}")]
    Panic(String),

    /// Caller supplied a stale handle, lock, or page reference.
    #[error("handle or lock is no longer valid")]
    AlreadyInvalid,

    /// The deadlock detector chose this locker as its victim.
    #[error("deadlock detected, transaction aborted")]
    Deadlock,

    /// `DB_LOCK_NOWAIT` semantics or non-fatal expiry; no lock was granted.
    #[error("lock request not granted")]
    NotGranted,

    /// Logical absence: a page past EOF, or a lock object that no longer
    /// exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// Allocator exhaustion in the mpool or lock region.
    #[error("no space left in region")]
    NoSpace,

    /// A read-only file handle could not be upgraded for write-back.
    #[error("permission denied: {0}")]
    Perm(String),

    /// Low-level I/O failure from the OS layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Verifier found a non-fatal consistency problem; the walk continues.
    #[error("verification finding: {0}")]
    VerifyBad(String),

    /// Verifier found a fatal consistency problem; the walk must stop.
    #[error("fatal verification error: {0}")]
    VerifyFatal(String),

    /// A region-attach size mismatch persisted after the retry budget.
    #[error("environment attach failed after retries: {0}")]
    Again(String),

    /// The recovery log's LSN chain does not parse or is internally
    /// inconsistent.
    #[error("log corrupt at {0}")]
    LogCorrupt(String),

    /// Requested region/sub-region is still attached elsewhere.
    #[error("region is busy (refcount > 0)")]
    Busy,

    /// Invalid argument supplied by the caller (mode unknown, timeout
    /// inherited from a parent that has none, etc).
    #[error("invalid argument: {0}")]
    InvalidArg(String),
}

impl Error {
    pub fn panic(msg: impl Into<String>) -> Self {
        Error::Panic(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn perm(msg: impl Into<String>) -> Self {
        Error::Perm(msg.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panic(_))
    }
}
