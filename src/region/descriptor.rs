//! REGINFO — a sub-region descriptor: one slot per subsystem (mpool,
//! lock, log, txn) that shares the environment's arena.

use std::sync::atomic::{AtomicU32, Ordering};

/// What kind of subsystem owns a sub-region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionType {
    Mpool,
    Lock,
    Log,
    Txn,
}

/// One descriptor slot in the environment's sub-region table.
pub struct RegionDescriptor {
    pub rtype: RegionType,
    pub id: u32,
    pub size: usize,
    refcount: AtomicU32,
}

impl RegionDescriptor {
    pub fn new(rtype: RegionType, id: u32, size: usize) -> Self {
        Self { rtype, id, size, refcount: AtomicU32::new(1) }
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn attach(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Detaches one reference, returning the resulting count. The
    /// caller destroys the region's backing storage once this reaches 0.
    pub fn detach(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach_refcounting() {
        let d = RegionDescriptor::new(RegionType::Mpool, 1, 4096);
        assert_eq!(d.refcount(), 1);
        d.attach();
        assert_eq!(d.refcount(), 2);
        d.detach();
        assert_eq!(d.refcount(), 1);
    }
}
