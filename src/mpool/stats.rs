//! Pool-wide statistics for the mpool cache.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by every cache, bucket and file in the pool.
#[derive(Debug)]
pub struct MpoolStats {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub evictions: AtomicU64,
    /// Evictions that had to write a dirty buffer back first.
    pub dirty_evictions: AtomicU64,
    pub pages_read: AtomicU64,
    pub pages_written: AtomicU64,
    /// Times `fget` had to spin/yield waiting for a BH_LOCKED buffer.
    pub lock_waits: AtomicU64,
    /// Times a sync pass had to wait out a pinned buffer's ref_sync drain.
    pub sync_waits: AtomicU64,
}

impl MpoolStats {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            dirty_evictions: AtomicU64::new(0),
            pages_read: AtomicU64::new(0),
            pages_written: AtomicU64::new(0),
            lock_waits: AtomicU64::new(0),
            sync_waits: AtomicU64::new(0),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> MpoolStatsSnapshot {
        MpoolStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            dirty_evictions: self.dirty_evictions.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            sync_waits: self.sync_waits.load(Ordering::Relaxed),
        }
    }
}

impl Default for MpoolStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpoolStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub dirty_evictions: u64,
    pub pages_read: u64,
    pub pages_written: u64,
    pub lock_waits: u64,
    pub sync_waits: u64,
}

impl MpoolStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for MpoolStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MpoolStats {{ hits: {}, misses: {}, evictions: {} ({} dirty), hit_rate: {:.2}% }}",
            self.cache_hits,
            self.cache_misses,
            self.evictions,
            self.dirty_evictions,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_hit_rate() {
        let s = MpoolStats::new();
        s.cache_hits.fetch_add(9, Ordering::Relaxed);
        s.cache_misses.fetch_add(1, Ordering::Relaxed);
        assert_eq!(s.hit_rate(), 0.9);
    }

    #[test]
    fn test_stats_snapshot_display() {
        let s = MpoolStats::new();
        s.cache_hits.fetch_add(1, Ordering::Relaxed);
        let snap = s.snapshot();
        assert!(format!("{snap}").contains("hits: 1"));
    }
}
