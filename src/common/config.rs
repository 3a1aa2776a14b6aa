//! Configuration constants and runtime options for the storage engine.

use std::time::Duration;

/// Size of a page in bytes (4KB).
///
/// This value is chosen to match:
/// - OS page size on most systems (4096 bytes)
/// - Common database page sizes
///
/// # Alignment
/// Pages are aligned to 4096 bytes for efficient Direct I/O (O_DIRECT).
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of pages with u32 PageId.
pub const MAX_PAGES: u64 = (u32::MAX as u64) + 1;

/// Maximum theoretical database size in bytes.
pub const MAX_DB_SIZE_BYTES: u64 = MAX_PAGES * PAGE_SIZE as u64;

/// Number of hash buckets per mpool cache partition.
pub const DEFAULT_NBUCKETS: usize = 37;

/// Number of independent cache partitions an mpool may be split into.
/// Each partition has its own region lock, reducing contention.
pub const DEFAULT_NCACHES: usize = 1;

/// Fraction (as a percentage) of the LRU window treated as "too young to
/// evict" during a `memp_alloc` bucket scan.
pub const EVICT_SKIP_PERCENT: u32 = 10;

/// Number of buckets scanned per step while looking for an eviction victim.
pub const EVICT_SCAN_WIDTH: usize = 2;

/// Upper bound on the `BH_LOCKED` spin-then-yield retry count in `fget`.
pub const FGET_SPIN_ROUNDS: u32 = 3;

/// Upper bound on `sync_int`'s wait for `ref_sync` to drain, in 1-second
/// steps.
pub const SYNC_WAIT_ROUNDS: u32 = 3;
pub const SYNC_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest locker id reserved for non-transactional ("family"/handle)
/// lockers. Transactional lockers occupy `[1, TXN_MINIMUM)`.
pub const TXN_MINIMUM: u32 = 0x8000_0000;

/// Largest legal locker id.
pub const DB_LOCK_MAXID: u32 = u32::MAX - 1;

/// Queue access method: default number of pages per extent file.
pub const DEFAULT_PAGE_EXT: u32 = 16;

/// Victim-selection policy for the deadlock detector's waits-for graph
/// walk, mirroring the region's `detect` mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectPolicy {
    /// Abort the first locker found to close a cycle.
    #[default]
    Default,
    Oldest,
    Youngest,
    Random,
    MinLocks,
    MinWrites,
}

/// Engine-wide tunable options, aggregated the way a caller configures an
/// environment before opening it.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Number of frames across the whole mpool (all caches combined).
    pub pool_size: usize,
    /// Number of independent cache partitions.
    pub ncaches: usize,
    /// Number of hash buckets per cache.
    pub nbuckets: usize,
    /// Maximum number of distinct files mpool keeps open for flushing
    /// before it starts closing the least recently used ones.
    pub mp_maxopenfd: usize,
    /// Sleep after this many writes in a sync/trickle pass, to avoid
    /// saturating the disk. Zero disables the pause.
    pub mp_maxwrite: usize,
    pub mp_maxwrite_sleep: Duration,
    /// Default lock-request timeout (zero means no timeout).
    pub lock_timeout: Duration,
    /// Default transaction timeout (zero means no timeout).
    pub txn_timeout: Duration,
    /// Victim-selection policy the deadlock detector applies per cycle.
    pub deadlock_policy: DetectPolicy,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            ncaches: DEFAULT_NCACHES,
            nbuckets: DEFAULT_NBUCKETS,
            mp_maxopenfd: 64,
            mp_maxwrite: 0,
            mp_maxwrite_sleep: Duration::from_millis(0),
            lock_timeout: Duration::from_secs(0),
            txn_timeout: Duration::from_secs(0),
            deadlock_policy: DetectPolicy::Default,
        }
    }
}

impl EnvConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn with_ncaches(mut self, ncaches: usize) -> Self {
        assert!(ncaches > 0, "ncaches must be > 0");
        self.ncaches = ncaches;
        self
    }

    pub fn with_nbuckets(mut self, nbuckets: usize) -> Self {
        assert!(nbuckets > 0, "nbuckets must be > 0");
        self.nbuckets = nbuckets;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_txn_timeout(mut self, timeout: Duration) -> Self {
        self.txn_timeout = timeout;
        self
    }

    pub fn with_deadlock_policy(mut self, policy: DetectPolicy) -> Self {
        self.deadlock_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_max_db_size() {
        let expected = 16 * 1024u64 * 1024 * 1024 * 1024;
        assert_eq!(MAX_DB_SIZE_BYTES, expected);
    }

    #[test]
    fn test_locker_id_space_partition() {
        assert!(TXN_MINIMUM > 1);
        assert!(DB_LOCK_MAXID > TXN_MINIMUM);
    }

    #[test]
    fn test_env_config_builder() {
        let cfg = EnvConfig::new(256).with_ncaches(2).with_nbuckets(61);
        assert_eq!(cfg.pool_size, 256);
        assert_eq!(cfg.ncaches, 2);
        assert_eq!(cfg.nbuckets, 61);
    }

    #[test]
    fn test_env_config_defaults_to_default_deadlock_policy() {
        let cfg = EnvConfig::new(256);
        assert_eq!(cfg.deadlock_policy, DetectPolicy::Default);
    }

    #[test]
    fn test_env_config_deadlock_policy_builder() {
        let cfg = EnvConfig::new(256).with_deadlock_policy(DetectPolicy::Youngest);
        assert_eq!(cfg.deadlock_policy, DetectPolicy::Youngest);
    }
}
