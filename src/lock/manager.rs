//! DB_LOCKREGION — the lock manager proper: object/locker tables, the
//! vectored operation entry point, and timeout bookkeeping. Mirrors the
//! buffer pool's `Mpool` in shape: one shared manager, fine-grained
//! internal locking, RAII-free handles (a `Lock` is freed by an
//! explicit `lock_put`, since ownership can move between lockers via
//! inherit/trade in ways a scope-guard doesn't fit the way page pins do).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::common::config::DetectPolicy;
use crate::common::{Clock, Error, Result, Timeval};

use super::detect::{DeadlockDetector, GraphWalkDetector, LockerStats, WaitEdge};
use super::lock::{Lock, LockStatus};
use super::locker::{Locker, LockerId, LockerIdAllocator, LockerFlags};
use super::mode::{ConflictMatrix, LockMode};
use super::object::{Entry, GenCounter, LockObject, ObjectKey, WaitPosition};

/// Which timeout field a `set_timeout` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOp {
    Txn,
    Lock,
    TxnNow,
}

/// A vectored request, matching the engine's heterogeneous `lock_vec` list.
pub enum LockOp {
    Get { object: ObjectKey, mode: LockMode, nowait: bool },
    Put { lock: Arc<Lock> },
    PutAll,
    PutRead,
    PutObj { object: ObjectKey },
    UpgradeWrite,
    Inherit { parent: LockerId },
    Timeout,
    Trade { lock: Arc<Lock>, new_locker: LockerId },
}

/// Outcome of a single `LockOp` inside a `lock_vec` call.
pub enum LockOpResult {
    Granted(Arc<Lock>),
    Released,
    Noop,
}

pub struct LockManager {
    objects: RwLock<HashMap<ObjectKey, Arc<LockObject>>>,
    lockers: RwLock<HashMap<LockerId, Arc<Locker>>>,
    /// Live `Lock` handles keyed by `(locker, lock_gen)`, so a waiter
    /// promoted by a later `lock_put` can have its own handle's status
    /// flipped to `Held` rather than only the internal holder-list entry.
    handles: RwLock<HashMap<(LockerId, u32), Arc<Lock>>>,
    id_alloc: LockerIdAllocator,
    matrix: ConflictMatrix,
    gen: GenCounter,
    clock: Arc<dyn Clock>,
    need_dd: AtomicBool,
    next_timeout: Mutex<Option<Timeval>>,
    region_timeout: Duration,
    detector: Arc<dyn DeadlockDetector>,
}

impl LockManager {
    pub fn new(clock: Arc<dyn Clock>, region_timeout: Duration) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            lockers: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            id_alloc: LockerIdAllocator::new(),
            matrix: ConflictMatrix::standard(),
            gen: GenCounter::new(),
            clock,
            need_dd: AtomicBool::new(false),
            next_timeout: Mutex::new(None),
            region_timeout,
            detector: Arc::new(GraphWalkDetector),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn DeadlockDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn need_dd(&self) -> bool {
        self.need_dd.load(Ordering::Acquire)
    }

    /// `lock_detect` (§6.2's exposed delegate): builds the waits-for
    /// graph from the current object table and hands it to the detector,
    /// then aborts every returned victim's waiting lock requests.
    pub fn lock_detect(&self, policy: DetectPolicy) -> Result<Vec<LockerId>> {
        let edges = self.build_waits_for_graph();
        let lockers = self.lockers.read();
        let stats = |id: LockerId| -> LockerStats {
            lockers
                .get(&id)
                .map(|l| LockerStats {
                    nlocks: l.nlocks.load(Ordering::Acquire),
                    nwrites: l.nwrites.load(Ordering::Acquire),
                })
                .unwrap_or_default()
        };
        let aborted = self.detector.detect(&edges, policy, &stats);
        drop(lockers);

        for victim in &aborted {
            self.abort_waiting_locker(*victim);
        }
        self.need_dd.store(false, Ordering::Release);
        if !aborted.is_empty() {
            warn!("lock_detect: aborted locker(s) {aborted:?} to break a deadlock cycle");
        }
        Ok(aborted)
    }

    fn build_waits_for_graph(&self) -> Vec<WaitEdge> {
        let mut edges = Vec::new();
        for obj in self.objects.read().values() {
            let holders = obj.holders();
            for w in obj.waiters() {
                for h in &holders {
                    if h.locker != w.locker && self.matrix.conflicts(h.mode, w.mode) {
                        edges.push(WaitEdge { waiter: w.locker, holder: h.locker });
                    }
                }
            }
        }
        edges
    }

    fn abort_waiting_locker(&self, locker_id: LockerId) {
        let victims: Vec<Arc<Lock>> = self
            .handles
            .read()
            .values()
            .filter(|l| l.locker == locker_id && l.status() == LockStatus::Waiting)
            .cloned()
            .collect();

        for lock in victims {
            let obj = self.object(&lock.object);
            obj.remove_waiter(lock.locker, lock.gen);
            lock.set_status(LockStatus::Aborted);
        }
    }

    pub fn next_timeout(&self) -> Option<Timeval> {
        *self.next_timeout.lock()
    }

    fn publish_timeout(&self, tv: Timeval) {
        let mut slot = self.next_timeout.lock();
        if slot.map(|cur| tv < cur).unwrap_or(true) {
            *slot = Some(tv);
        }
    }

    // ---- locker id allocation (4.3.1) ----

    pub fn lock_id(&self) -> Result<LockerId> {
        let id = self.id_alloc.alloc_txn()?;
        self.lockers
            .write()
            .insert(id, Arc::new(Locker::new(id, None)));
        Ok(id)
    }

    pub fn lock_id_family(&self, parent: Option<LockerId>) -> Result<LockerId> {
        let id = self.id_alloc.alloc_family()?;
        self.lockers
            .write()
            .insert(id, Arc::new(Locker::new(id, parent)));
        Ok(id)
    }

    pub fn lock_id_free(&self, id: LockerId) -> Result<()> {
        let lockers = self.lockers.read();
        if let Some(locker) = lockers.get(&id) {
            if locker.nlocks.load(Ordering::Acquire) != 0 {
                return Err(Error::InvalidArg(
                    "locker still holds locks".to_string(),
                ));
            }
        }
        drop(lockers);
        self.lockers.write().remove(&id);
        self.id_alloc.free(id);
        Ok(())
    }

    fn locker(&self, id: LockerId) -> Result<Arc<Locker>> {
        self.lockers
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("locker {id}")))
    }

    fn object(&self, key: &ObjectKey) -> Arc<LockObject> {
        if let Some(obj) = self.objects.read().get(key) {
            return obj.clone();
        }
        self.objects
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(LockObject::new()))
            .clone()
    }

    fn is_ancestor(&self, ancestor: LockerId, locker: LockerId) -> bool {
        let lockers = self.lockers.read();
        let mut cur = locker;
        loop {
            match lockers.get(&cur).and_then(|l| l.parent) {
                Some(p) if p == ancestor => return true,
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// `lock_get_internal` (4.3.3), simplified: no per-call sleeping —
    /// a request that cannot be granted immediately either fails with
    /// `NOTGRANTED` (when `nowait` is set) or is queued as a waiter and
    /// reported back so the caller can block on its own condvar.
    pub fn lock_get(
        &self,
        locker_id: LockerId,
        object: ObjectKey,
        mode: LockMode,
        nowait: bool,
    ) -> Result<Arc<Lock>> {
        let locker = self.locker(locker_id)?;
        let obj = self.object(&object);

        let holders = obj.holders();

        if let Some(existing) = holders
            .iter()
            .find(|h| h.locker == locker_id && h.mode == mode)
        {
            let lock = Arc::new(Lock::new(locker_id, object, mode, existing.lock_gen));
            lock.set_status(LockStatus::Held);
            lock.incr_ref();
            return Ok(lock);
        }

        // An upgrade: this locker (or one of its descendants) already
        // holds WASWRITE on the object and now wants WRITE back. Per
        // 4.3.3 these jump the queue (WaitPosition::Head) once blocked,
        // rather than joining the FIFO tail, so a writer that dirty-read
        // its way through doesn't starve behind later arrivals.
        let is_write_upgrade = mode == LockMode::Write
            && holders.iter().any(|h| {
                h.mode == LockMode::WasWrite
                    && (h.locker == locker_id || self.is_ancestor(locker_id, h.locker))
            });

        let mut blocked = false;
        for h in &holders {
            if h.locker == locker_id {
                continue;
            }
            if self.is_ancestor(h.locker, locker_id) {
                continue;
            }
            if self.matrix.conflicts(h.mode, mode) {
                blocked = true;
                break;
            }
        }

        let mut position = WaitPosition::Tail;

        if !blocked && obj.has_waiters() {
            if mode == LockMode::Dirty {
                // DIRTY normally bypasses the FIFO-starvation guard
                // entirely, except when the head of the queue is itself
                // a blocked upgrade of a WASWRITE holder this request
                // doesn't conflict with — then it must not jump ahead
                // of that upgrade, but slots in right behind it instead.
                let holders_compatible = holders
                    .iter()
                    .all(|h| !self.matrix.conflicts(h.mode, mode));
                let waiters = obj.waiters();
                let head_is_matching_upgrade = waiters.first().is_some_and(|w| {
                    w.mode == LockMode::Write
                        && holders.iter().any(|h| {
                            h.mode == LockMode::WasWrite
                                && (h.locker == w.locker || self.is_ancestor(w.locker, h.locker))
                        })
                });
                if holders_compatible && head_is_matching_upgrade {
                    blocked = true;
                    position = WaitPosition::Second;
                }
            } else {
                blocked = true;
            }
        }

        if blocked && is_write_upgrade && position == WaitPosition::Tail {
            position = WaitPosition::Head;
        }

        if blocked {
            if nowait {
                warn!("lock_get: locker {locker_id} request for {mode:?} rejected (NOTGRANTED, nowait)");
                return Err(Error::NotGranted);
            }
            let lock_gen = self.gen.next();
            let lock = Arc::new(Lock::new(locker_id, object, mode, lock_gen));
            lock.set_status(LockStatus::Waiting);
            obj.insert_waiter(Entry { locker: locker_id, mode, lock_gen }, position);
            self.handles.write().insert((locker_id, lock_gen), lock.clone());
            self.arm_timeout(&locker);
            debug!("lock_get: locker {locker_id} queued for {mode:?} at {position:?} (gen {lock_gen})");
            return Ok(lock);
        }

        let lock_gen = self.gen.next();
        let lock = Arc::new(Lock::new(locker_id, object, mode, lock_gen));
        lock.set_status(LockStatus::Held);
        obj.add_holder(Entry { locker: locker_id, mode, lock_gen });
        self.handles.write().insert((locker_id, lock_gen), lock.clone());
        locker.nlocks.fetch_add(1, Ordering::AcqRel);
        if mode.is_write_class() {
            locker.nwrites.fetch_add(1, Ordering::AcqRel);
        }
        trace!("lock_get: locker {locker_id} granted {mode:?} immediately (gen {lock_gen})");
        Ok(lock)
    }

    fn arm_timeout(&self, locker: &Locker) {
        let tx_expire = *locker.tx_expire.lock();
        if tx_expire.is_valid() {
            self.publish_timeout(tx_expire);
        }
    }

    /// `lock_put_internal` (4.3.4).
    pub fn lock_put(&self, lock: &Lock) -> Result<()> {
        if lock.decr_ref() > 0 {
            return Ok(());
        }

        let obj = self.object(&lock.object);
        let removed_holder = obj.remove_holder(lock.locker, lock.gen);
        if removed_holder.is_none() {
            obj.remove_waiter(lock.locker, lock.gen);
        }
        lock.set_status(LockStatus::Free);
        self.handles.write().remove(&(lock.locker, lock.gen));

        if removed_holder.is_some() {
            if let Ok(locker) = self.locker(lock.locker) {
                locker.nlocks.fetch_sub(1, Ordering::AcqRel);
                if lock.mode.is_write_class() {
                    locker.nwrites.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        debug!("lock_put: released lock held by locker {} (mode {:?})", lock.locker, lock.mode);
        let promoted = obj.try_grant_next(&self.matrix);
        if let Some(p) = promoted {
            if let Ok(locker) = self.locker(p.locker) {
                locker.nlocks.fetch_add(1, Ordering::AcqRel);
                if p.mode.is_write_class() {
                    locker.nwrites.fetch_add(1, Ordering::AcqRel);
                }
            }
            if let Some(handle) = self.handles.read().get(&(p.locker, p.lock_gen)) {
                handle.set_status(LockStatus::Held);
            }
            debug!("lock_put: promoted waiter locker {} to {:?}", p.locker, p.mode);
        } else {
            trace!("lock_put: no waiter to promote on this object");
            self.need_dd.store(true, Ordering::Release);
        }

        if obj.is_empty() {
            self.objects.write().remove(&lock.object);
        }

        Ok(())
    }

    /// `lock_downgrade` (4.3.5).
    pub fn lock_downgrade(&self, lock: &Lock, new_mode: LockMode) -> Result<()> {
        let obj = self.object(&lock.object);
        obj.remove_holder(lock.locker, lock.gen);
        let was_write = lock.mode.is_write_class();
        obj.add_holder(Entry { locker: lock.locker, mode: new_mode, lock_gen: lock.gen });

        if was_write && new_mode == LockMode::WasWrite {
            if let Ok(locker) = self.locker(lock.locker) {
                locker.flags.lock().insert(LockerFlags::DIRTY);
            }
        }
        if was_write && !new_mode.is_write_class() {
            if let Ok(locker) = self.locker(lock.locker) {
                locker.nwrites.fetch_sub(1, Ordering::AcqRel);
            }
        }

        obj.try_grant_next(&self.matrix);
        Ok(())
    }

    // ---- timeouts (4.3.7) ----

    pub fn set_timeout(&self, locker_id: LockerId, ms: u64, op: TimeoutOp) -> Result<()> {
        let locker = self.locker(locker_id)?;
        let now = self.clock.now();
        match op {
            TimeoutOp::Txn => {
                *locker.tx_expire.lock() = if ms == 0 {
                    Timeval::INVALID
                } else {
                    Timeval::expires_after(now, Duration::from_millis(ms))
                };
            }
            TimeoutOp::Lock => {
                locker.lk_timeout_us.store((ms * 1000) as u32, Ordering::Relaxed);
                locker.flags.lock().insert(LockerFlags::TIMEOUT);
            }
            TimeoutOp::TxnNow => {
                let expire = Timeval::expires_after(now, Duration::ZERO);
                *locker.tx_expire.lock() = expire;
                *locker.lk_expire.lock() = expire;
                self.publish_timeout(expire);
            }
        }
        Ok(())
    }

    pub fn inherit_timeout(&self, parent: LockerId, child: LockerId) -> Result<()> {
        let p = self.locker(parent)?;
        let c = self.locker(child)?;
        let tx = *p.tx_expire.lock();
        if !tx.is_valid() {
            return Err(Error::InvalidArg("parent has no usable timeout".to_string()));
        }
        *c.tx_expire.lock() = tx;
        let lk = p.lk_timeout_us.load(Ordering::Relaxed);
        if lk != 0 {
            c.lk_timeout_us.store(lk, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Whether `locker`'s lock timeout has passed, per `region_timeout`
    /// fallback when no explicit per-locker timeout was set.
    pub fn locker_timeout(&self, locker: &Locker) -> Duration {
        let us = locker.lk_timeout_us.load(Ordering::Relaxed);
        if us == 0 {
            self.region_timeout
        } else {
            Duration::from_micros(us as u64)
        }
    }

    // ---- vectored ops (4.3.6) ----

    pub fn lock_vec(&self, locker_id: LockerId, ops: Vec<LockOp>) -> Result<Vec<LockOpResult>> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let r = match op {
                LockOp::Get { object, mode, nowait } => {
                    LockOpResult::Granted(self.lock_get(locker_id, object, mode, nowait)?)
                }
                LockOp::Put { lock } => {
                    self.lock_put(&lock)?;
                    LockOpResult::Released
                }
                LockOp::PutAll => {
                    self.put_all(locker_id, None)?;
                    LockOpResult::Noop
                }
                LockOp::PutRead => {
                    self.put_all(locker_id, Some(false))?;
                    LockOpResult::Noop
                }
                LockOp::UpgradeWrite => {
                    self.upgrade_write(locker_id)?;
                    LockOpResult::Noop
                }
                LockOp::PutObj { object } => {
                    self.put_obj(&object)?;
                    LockOpResult::Noop
                }
                LockOp::Inherit { parent } => {
                    self.inherit(locker_id, parent)?;
                    LockOpResult::Noop
                }
                LockOp::Timeout => {
                    self.set_timeout(locker_id, 0, TimeoutOp::TxnNow)?;
                    LockOpResult::Noop
                }
                LockOp::Trade { lock, new_locker } => {
                    self.trade(&lock, new_locker)?;
                    LockOpResult::Noop
                }
            };
            results.push(r);
        }
        Ok(results)
    }

    /// Releases every (or only read-class, when `writes_only == Some(false)`)
    /// lock held by `locker`, marking it DELETED for the duration so
    /// concurrent traversals see a consistent snapshot.
    fn put_all(&self, locker_id: LockerId, writes_only: Option<bool>) -> Result<()> {
        let locker = self.locker(locker_id)?;
        locker.mark_deleted(true);

        let victims: Vec<(ObjectKey, Entry)> = self
            .objects
            .read()
            .iter()
            .flat_map(|(k, obj)| {
                obj.holders()
                    .into_iter()
                    .filter(|e| e.locker == locker_id)
                    .map(move |e| (k.clone(), e))
            })
            .collect();

        for (key, entry) in victims {
            if writes_only == Some(false) && entry.mode.is_write_class() {
                continue;
            }
            let lock = Lock::new(locker_id, key, entry.mode, entry.lock_gen);
            lock.set_status(LockStatus::Held);
            self.lock_put(&lock)?;
        }

        locker.mark_deleted(false);
        Ok(())
    }

    /// PUT_OBJ (4.3.6): tears down an object's holder and waiter lists
    /// at once, releasing every handle queued on it rather than just
    /// the map entry. Every affected locker's counts are adjusted and
    /// every live `Lock` handle is flipped to `NotExist` so a caller
    /// blocked on it wakes up instead of waiting forever.
    fn put_obj(&self, object: &ObjectKey) -> Result<()> {
        let Some(obj) = self.objects.write().remove(object) else {
            return Ok(());
        };

        let holders = obj.holders();
        let waiters = obj.waiters();

        for h in &holders {
            if let Ok(locker) = self.locker(h.locker) {
                locker.nlocks.fetch_sub(1, Ordering::AcqRel);
                if h.mode.is_write_class() {
                    locker.nwrites.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        let mut handles = self.handles.write();
        for e in holders.iter().chain(waiters.iter()) {
            if let Some(handle) = handles.remove(&(e.locker, e.lock_gen)) {
                handle.set_status(LockStatus::NotExist);
            }
        }

        debug!(
            "put_obj: removed object, released {} holder(s) and {} waiter(s)",
            holders.len(),
            waiters.len()
        );
        Ok(())
    }

    fn upgrade_write(&self, locker_id: LockerId) -> Result<()> {
        let dirty = {
            let locker = self.locker(locker_id)?;
            locker.flags.lock().contains(LockerFlags::DIRTY)
        };
        if !dirty {
            return Ok(());
        }
        for (key, obj) in self.objects.read().iter() {
            let has_dirty = obj
                .holders()
                .iter()
                .any(|e| e.locker == locker_id && e.mode == LockMode::Dirty);
            if has_dirty {
                let lock = self.lock_get(locker_id, key.clone(), LockMode::Write, true)?;
                lock.incr_ref();
            }
        }
        Ok(())
    }

    /// INHERIT (4.3.6): merges `child`'s locks into `parent`.
    fn inherit(&self, child: LockerId, parent: LockerId) -> Result<()> {
        let child_locker = self.locker(child)?;
        let parent_locker = self.locker(parent)?;
        child_locker.mark_deleted(true);

        let held: Vec<(ObjectKey, Entry)> = self
            .objects
            .read()
            .iter()
            .flat_map(|(k, obj)| {
                obj.holders()
                    .into_iter()
                    .filter(|e| e.locker == child)
                    .map(move |e| (k.clone(), e))
            })
            .collect();

        for (key, entry) in held {
            let obj = self.object(&key);
            obj.remove_holder(child, entry.lock_gen);

            let already = obj
                .holders()
                .iter()
                .any(|h| h.locker == parent && h.mode == entry.mode);
            if !already {
                obj.add_holder(Entry { locker: parent, mode: entry.mode, lock_gen: entry.lock_gen });
                parent_locker.nlocks.fetch_add(1, Ordering::AcqRel);
                if entry.mode.is_write_class() {
                    parent_locker.nwrites.fetch_add(1, Ordering::AcqRel);
                }
            }
            obj.try_grant_next(&self.matrix);
        }

        self.lockers.write().remove(&child);
        self.id_alloc.free(child);
        Ok(())
    }

    fn trade(&self, lock: &Lock, new_locker: LockerId) -> Result<()> {
        let obj = self.object(&lock.object);
        if obj.remove_holder(lock.locker, lock.gen).is_some() {
            obj.add_holder(Entry { locker: new_locker, mode: lock.mode, lock_gen: lock.gen });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::FixedClock;

    fn mgr() -> LockManager {
        LockManager::new(Arc::new(FixedClock::new(Timeval { sec: 0, usec: 0 })), Duration::from_secs(5))
    }

    #[test]
    fn test_grant_uncontended() {
        let m = mgr();
        let l1 = m.lock_id().unwrap();
        let lock = m.lock_get(l1, ObjectKey::from_page(1, 1), LockMode::Write, false).unwrap();
        assert!(lock.is_held());
    }

    #[test]
    fn test_conflicting_write_blocks() {
        let m = mgr();
        let l1 = m.lock_id().unwrap();
        let l2 = m.lock_id().unwrap();
        let key = ObjectKey::from_page(1, 1);
        let lock1 = m.lock_get(l1, key.clone(), LockMode::Write, false).unwrap();
        assert!(lock1.is_held());
        let lock2 = m.lock_get(l2, key, LockMode::Write, true);
        assert!(matches!(lock2, Err(Error::NotGranted)));
    }

    #[test]
    fn test_release_promotes_waiter() {
        let m = mgr();
        let l1 = m.lock_id().unwrap();
        let l2 = m.lock_id().unwrap();
        let key = ObjectKey::from_page(1, 1);
        let lock1 = m.lock_get(l1, key.clone(), LockMode::Write, false).unwrap();
        let lock2 = m.lock_get(l2, key, LockMode::Write, false).unwrap();
        assert_eq!(lock2.status(), LockStatus::Waiting);
        m.lock_put(&lock1).unwrap();
        assert_eq!(lock2.status(), LockStatus::Held);
    }

    #[test]
    fn test_shared_reads_compatible() {
        let m = mgr();
        let l1 = m.lock_id().unwrap();
        let l2 = m.lock_id().unwrap();
        let key = ObjectKey::from_page(1, 1);
        let lock1 = m.lock_get(l1, key.clone(), LockMode::Read, false).unwrap();
        let lock2 = m.lock_get(l2, key, LockMode::Read, false).unwrap();
        assert!(lock1.is_held());
        assert!(lock2.is_held());
    }

    #[test]
    fn test_lock_id_free_rejects_active_locker() {
        let m = mgr();
        let l1 = m.lock_id().unwrap();
        let _lock = m.lock_get(l1, ObjectKey::from_page(1, 1), LockMode::Write, false).unwrap();
        assert!(m.lock_id_free(l1).is_err());
    }

    #[test]
    fn test_inherit_merges_into_parent() {
        let m = mgr();
        let parent = m.lock_id().unwrap();
        let child = m.lock_id_family(Some(parent)).unwrap();
        let key = ObjectKey::from_page(1, 1);
        let _lock = m.lock_get(child, key.clone(), LockMode::Write, false).unwrap();
        m.inherit(child, parent).unwrap();
        let obj = m.object(&key);
        assert!(obj.holders().iter().any(|h| h.locker == parent));
    }

    #[test]
    fn test_lock_detect_breaks_cycle_and_aborts_one_waiter() {
        let m = mgr();
        let a = m.lock_id().unwrap();
        let b = m.lock_id().unwrap();
        let x = ObjectKey::from_page(1, 1);
        let y = ObjectKey::from_page(1, 2);

        let a_x = m.lock_get(a, x.clone(), LockMode::Read, false).unwrap();
        let b_y = m.lock_get(b, y.clone(), LockMode::Read, false).unwrap();
        let a_y = m.lock_get(a, y, LockMode::Write, false).unwrap();
        let b_x = m.lock_get(b, x, LockMode::Write, false).unwrap();
        assert_eq!(a_y.status(), LockStatus::Waiting);
        assert_eq!(b_x.status(), LockStatus::Waiting);

        let aborted = m.lock_detect(DetectPolicy::Default).unwrap();
        assert_eq!(aborted.len(), 1);
        let victim = aborted[0];
        assert!(victim == a || victim == b);

        let (victim_lock, survivor_lock) = if victim == a { (&a_y, &b_x) } else { (&b_x, &a_y) };
        assert_eq!(victim_lock.status(), LockStatus::Aborted);
        assert_eq!(survivor_lock.status(), LockStatus::Waiting);

        assert!(a_x.is_held());
        assert!(b_y.is_held());
        assert!(!m.need_dd());
    }

    #[test]
    fn test_lock_detect_is_noop_without_a_cycle() {
        let m = mgr();
        let a = m.lock_id().unwrap();
        let b = m.lock_id().unwrap();
        let key = ObjectKey::from_page(2, 1);
        let _lock1 = m.lock_get(a, key.clone(), LockMode::Write, false).unwrap();
        let lock2 = m.lock_get(b, key, LockMode::Write, false).unwrap();
        assert_eq!(lock2.status(), LockStatus::Waiting);

        let aborted = m.lock_detect(DetectPolicy::Default).unwrap();
        assert!(aborted.is_empty());
        assert_eq!(lock2.status(), LockStatus::Waiting);
    }

    /// Scenario S4: a holds WASWRITE, b (a's family upgrade) wants WRITE
    /// back and blocks behind nothing conflicting but still queues, and
    /// a later DIRTY reader c must not jump ahead of b's queued upgrade
    /// even though DIRTY is otherwise non-conflicting with WASWRITE.
    #[test]
    fn test_s4_dirty_reader_enqueues_second_behind_matching_identity_upgrade() {
        let m = mgr();
        let b = m.lock_id().unwrap();
        let a = m.lock_id_family(Some(b)).unwrap();
        let e = m.lock_id().unwrap();
        let c = m.lock_id().unwrap();
        let key = ObjectKey::from_page(1, 1);

        // a holds WASWRITE (as if downgraded from an earlier WRITE).
        let _a_lock = m.lock_get(a, key.clone(), LockMode::WasWrite, false).unwrap();

        // An unrelated waiter e queues first so the object has existing
        // waiters by the time b and c arrive.
        let e_lock = m.lock_get(e, key.clone(), LockMode::Write, false).unwrap();
        assert_eq!(e_lock.status(), LockStatus::Waiting);

        let obj = m.object(&key);
        assert_eq!(obj.waiters().iter().map(|w| w.locker).collect::<Vec<_>>(), vec![e]);

        // b, a's parent, requests WRITE: this is an upgrade of a's
        // WASWRITE holder and must jump to the head of the queue.
        let b_lock = m.lock_get(b, key.clone(), LockMode::Write, false).unwrap();
        assert_eq!(b_lock.status(), LockStatus::Waiting);
        assert_eq!(obj.waiters().iter().map(|w| w.locker).collect::<Vec<_>>(), vec![b, e]);

        // c requests DIRTY: non-conflicting with a's WASWRITE holder, so
        // it would normally bypass the waiter queue entirely, but b's
        // queued upgrade at the head means c must enqueue SECOND instead.
        let c_lock = m.lock_get(c, key.clone(), LockMode::Dirty, false).unwrap();
        assert_eq!(c_lock.status(), LockStatus::Waiting);
        assert_eq!(obj.waiters().iter().map(|w| w.locker).collect::<Vec<_>>(), vec![b, c, e]);

        // Once b aborts (e.g. deadlock victim), c is next in line and
        // gets promoted ahead of e.
        obj.remove_waiter(b, b_lock.gen);
        b_lock.set_status(LockStatus::Aborted);
        let promoted = obj.try_grant_next(&m.matrix);
        assert_eq!(promoted.map(|p| p.locker), Some(c));
    }

    #[test]
    fn test_put_obj_releases_holders_and_waiters() {
        let m = mgr();
        let l1 = m.lock_id().unwrap();
        let l2 = m.lock_id().unwrap();
        let key = ObjectKey::from_page(3, 1);

        let lock1 = m.lock_get(l1, key.clone(), LockMode::Write, false).unwrap();
        let lock2 = m.lock_get(l2, key.clone(), LockMode::Write, false).unwrap();
        assert_eq!(lock2.status(), LockStatus::Waiting);

        let locker1 = m.locker(l1).unwrap();
        assert_eq!(locker1.nlocks.load(Ordering::Acquire), 1);
        assert_eq!(locker1.nwrites.load(Ordering::Acquire), 1);

        m.put_obj(&key).unwrap();

        assert_eq!(lock1.status(), LockStatus::NotExist);
        assert_eq!(lock2.status(), LockStatus::NotExist);
        assert_eq!(locker1.nlocks.load(Ordering::Acquire), 0);
        assert_eq!(locker1.nwrites.load(Ordering::Acquire), 0);
        assert!(!m.handles.read().contains_key(&(l1, lock1.gen)));
        assert!(!m.handles.read().contains_key(&(l2, lock2.gen)));
    }
}
