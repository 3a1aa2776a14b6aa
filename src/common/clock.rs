//! Abstractions over the OS primitives the core consumes: a monotonic
//! clock and a process-unique id generator. Kept as traits so recovery
//! and the region manager stay deterministic under test.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A `(seconds, microseconds)` wall-clock timestamp, as the engine's
/// timeout and checkpoint-timestamp arithmetic expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timeval {
    pub sec: u64,
    pub usec: u32,
}

impl Timeval {
    pub const INVALID: Timeval = Timeval {
        sec: u64::MAX,
        usec: 0,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// `tv = max(now, tv) + timeout`, carrying microseconds into seconds.
    pub fn expires_after(now: Timeval, timeout: Duration) -> Timeval {
        let base = now;
        let add_sec = timeout.as_secs();
        let add_usec = timeout.subsec_micros();

        let mut usec = base.usec + add_usec;
        let mut sec = base.sec + add_sec;
        if usec >= 1_000_000 {
            usec -= 1_000_000;
            sec += 1;
        }
        Timeval { sec, usec }
    }

    pub fn has_expired(&self, now: Timeval) -> bool {
        if !self.is_valid() {
            return false;
        }
        now >= *self
    }
}

impl From<Duration> for Timeval {
    fn from(d: Duration) -> Self {
        Timeval {
            sec: d.as_secs(),
            usec: d.subsec_micros(),
        }
    }
}

/// High-resolution clock, abstracted so recovery/lock-timeout tests can
/// supply a deterministic implementation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timeval;
}

/// Real wall-clock time via `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timeval {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        d.into()
    }
}

/// A clock a test can advance manually, for deterministic timeout and
/// recovery-to-timestamp tests.
#[derive(Debug)]
pub struct FixedClock(parking_lot::Mutex<Timeval>);

impl FixedClock {
    pub fn new(start: Timeval) -> Self {
        Self(parking_lot::Mutex::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let mut t = self.0.lock();
        *t = Timeval::expires_after(*t, by);
    }

    pub fn set(&self, t: Timeval) {
        *self.0.lock() = t;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timeval {
        *self.0.lock()
    }
}

/// Generates process-wide unique 32-bit ids (environment ids, etc).
pub trait UniqueId: Send + Sync {
    fn next(&self) -> u32;
}

/// Monotonic counter seeded from the current time, good enough for a
/// single-process environment where ids only need to be unique within
/// the process's lifetime.
#[derive(Debug)]
pub struct CounterUniqueId(AtomicU32);

impl CounterUniqueId {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(1);
        Self(AtomicU32::new(seed))
    }
}

impl Default for CounterUniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl UniqueId for CounterUniqueId {
    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeval_expires_after_carries_microseconds() {
        let now = Timeval { sec: 5, usec: 700_000 };
        let tv = Timeval::expires_after(now, Duration::from_micros(1_500_000));
        assert_eq!(tv, Timeval { sec: 6, usec: 200_000 });
    }

    #[test]
    fn test_timeval_invalid_never_expires() {
        assert!(!Timeval::INVALID.has_expired(Timeval { sec: u64::MAX - 1, usec: 0 }));
    }

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::new(Timeval { sec: 0, usec: 0 });
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), Timeval { sec: 10, usec: 0 });
    }

    #[test]
    fn test_unique_id_monotonic() {
        let gen = CounterUniqueId::new();
        let a = gen.next();
        let b = gen.next();
        assert!(b > a);
    }
}
