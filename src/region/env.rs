//! REGENV — the environment-wide sentinel: a process-shared header
//! holding a magic/panic word, a refcount, the environment id, and the
//! sub-region table every subsystem attaches into.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::common::{Clock, Error, InstrumentedMutex, Result, UniqueId};

use super::allocator::ShAlloc;
use super::descriptor::{RegionDescriptor, RegionType};

const REGENV_MAGIC: u32 = 0x5265_4700; // "ReG\0"
const ATTACH_RETRIES: u32 = 3;
const ATTACH_BACKOFF: Duration = Duration::from_millis(10);

/// The environment header every sub-region hangs off of. `magic` is 0
/// while the creator is still initializing, set once setup is durable,
/// and left sticky-zeroed (via `panic_word`) once the environment is
/// declared unusable.
pub struct RegEnv {
    pub envid: u32,
    pub timestamp: u64,
    dir: PathBuf,
    magic: AtomicU32,
    panicked: AtomicBool,
    refcount: InstrumentedMutex<u32>,
    regions: RwLock<Vec<RegionDescriptor>>,
    pub arena: ShAlloc,
}

impl RegEnv {
    fn sentinel_path(dir: &Path) -> PathBuf {
        dir.join("__db.REGENV")
    }

    /// `e_attach` (4.1): create-or-join the environment sentinel,
    /// retrying on transient inconsistency.
    pub fn attach(
        dir: impl Into<PathBuf>,
        arena_size: usize,
        clock: &dyn Clock,
        ids: &dyn UniqueId,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = Self::sentinel_path(&dir);

        let mut last_err = None;
        for attempt in 0..ATTACH_RETRIES {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_file) => {
                    let env = RegEnv {
                        envid: ids.next(),
                        timestamp: clock.now().sec,
                        dir: dir.clone(),
                        magic: AtomicU32::new(0),
                        panicked: AtomicBool::new(false),
                        refcount: InstrumentedMutex::new(1),
                        regions: RwLock::new(Vec::new()),
                        arena: ShAlloc::new(arena_size),
                    };
                    env.magic.store(REGENV_MAGIC, Ordering::Release);
                    return Ok(env);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if path.exists() {
                        let env = RegEnv {
                            envid: ids.next(),
                            timestamp: clock.now().sec,
                            dir: dir.clone(),
                            magic: AtomicU32::new(REGENV_MAGIC),
                            panicked: AtomicBool::new(false),
                            refcount: InstrumentedMutex::new(1),
                            regions: RwLock::new(Vec::new()),
                            arena: ShAlloc::new(arena_size),
                        };
                        return Ok(env);
                    }
                    warn!("attach attempt {attempt} found inconsistent sentinel at {}, retrying", path.display());
                    last_err = Some(Error::Again(format!(
                        "attach attempt {attempt} found inconsistent sentinel"
                    )));
                    thread::sleep(ATTACH_BACKOFF * (attempt + 1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err.unwrap_or(Error::Again("attach exhausted retries".to_string())))
    }

    pub fn is_panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    pub fn panic(&self) {
        self.panicked.store(true, Ordering::Release);
    }

    pub fn magic_is_set(&self) -> bool {
        self.magic.load(Ordering::Acquire) == REGENV_MAGIC
    }

    pub fn refcount(&self) -> u32 {
        *self.refcount.lock()
    }

    /// `(nowait, wait)` acquisition counts for the environment's refcount
    /// mutex, the region-lock wait/nowait statistic.
    pub fn refcount_lock_stats(&self) -> (u64, u64) {
        (self.refcount.nowait_count(), self.refcount.wait_count())
    }

    pub fn bump_refcount(&self) -> u32 {
        let mut rc = self.refcount.lock();
        *rc += 1;
        *rc
    }

    /// `r_attach`: create or join a sub-region descriptor.
    pub fn r_attach(&self, rtype: RegionType, size: usize, create_ok: bool) -> Result<u32> {
        let mut regions = self.regions.write();
        if let Some(existing) = regions.iter().find(|r| r.rtype == rtype) {
            return Ok(existing.attach());
        }
        if !create_ok {
            return Err(Error::not_found("sub-region not present"));
        }
        let id = regions.len() as u32;
        regions.push(RegionDescriptor::new(rtype, id, size));
        Ok(1)
    }

    /// `r_detach`: drop one reference to a sub-region, optionally
    /// destroying its backing arena allocation when it hits zero.
    pub fn r_detach(&self, rtype: RegionType, destroy: bool) -> Result<()> {
        let mut regions = self.regions.write();
        let pos = regions
            .iter()
            .position(|r| r.rtype == rtype)
            .ok_or_else(|| Error::not_found("sub-region not attached"))?;
        let remaining = regions[pos].detach();
        if remaining == 0 && destroy {
            regions.remove(pos);
        }
        Ok(())
    }

    /// `e_detach`: decrement the environment refcount.
    pub fn detach(&self) -> u32 {
        let mut rc = self.refcount.lock();
        *rc = rc.saturating_sub(1);
        *rc
    }

    /// Destructive `remove` (4.1): tolerates a crashed creator by
    /// attaching, panicking the magic word, tearing down every
    /// sub-region, then unlinking the sentinel and any numbered region
    /// files from disk.
    pub fn remove(&self, force: bool) -> Result<()> {
        if !force && self.refcount() > 1 && !self.is_panicked() {
            return Err(Error::Busy);
        }
        debug!("removing environment {} at {}", self.envid, self.dir.display());
        self.panic();
        self.magic.store(0, Ordering::Release);
        self.regions.write().clear();

        let sentinel = Self::sentinel_path(&self.dir);
        if sentinel.exists() {
            std::fs::remove_file(&sentinel)?;
        }
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("__db.") {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }
}
