//! A thin wrapper over `parking_lot::Mutex` that counts contended versus
//! uncontended acquisitions, for the mutex wait/nowait statistics the
//! OS-primitives contract calls for.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Counts how often `lock()` acquired immediately (`nowait`) versus had
/// to block on a held mutex (`wait`), mirroring the region/env wait
/// counters without changing the locking behavior itself.
#[derive(Debug, Default)]
pub struct InstrumentedMutex<T> {
    inner: Mutex<T>,
    nowait: AtomicU64,
    wait: AtomicU64,
}

impl<T> InstrumentedMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            nowait: AtomicU64::new(0),
            wait: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        if let Some(guard) = self.inner.try_lock() {
            self.nowait.fetch_add(1, Ordering::Relaxed);
            return guard;
        }
        self.wait.fetch_add(1, Ordering::Relaxed);
        self.inner.lock()
    }

    pub fn wait_count(&self) -> u64 {
        self.wait.load(Ordering::Relaxed)
    }

    pub fn nowait_count(&self) -> u64 {
        self.nowait.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_uncontended_lock_counts_as_nowait() {
        let m = InstrumentedMutex::new(0u32);
        *m.lock() += 1;
        *m.lock() += 1;
        assert_eq!(m.nowait_count(), 2);
        assert_eq!(m.wait_count(), 0);
    }

    #[test]
    fn test_contended_lock_counts_as_wait() {
        let m = Arc::new(InstrumentedMutex::new(0u32));
        let guard = m.lock();
        let m2 = m.clone();
        let t = thread::spawn(move || {
            *m2.lock() += 1;
        });
        thread::sleep(std::time::Duration::from_millis(20));
        drop(guard);
        t.join().unwrap();
        assert_eq!(m.wait_count(), 1);
    }
}
