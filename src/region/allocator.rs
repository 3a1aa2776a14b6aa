//! A single-region best-fit allocator. The region is tracked as a
//! capacity budget rather than a raw shared-memory segment, so
//! `alloc`/`free` hand back offsets into that budget instead of
//! pointers — multiple attachers can share the same numbers.

use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

/// Best-fit allocator over a fixed-size byte arena. Tracks free blocks
/// as `(offset, size)` pairs, coalescing neighbors on free.
pub struct ShAlloc {
    capacity: usize,
    free: parking_lot::Mutex<Vec<FreeBlock>>,
}

impl ShAlloc {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: parking_lot::Mutex::new(vec![FreeBlock { offset: 0, size: capacity }]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the arena-relative offset of a block at least `size`
    /// bytes long, aligned to `align` (must be a power of two).
    pub fn alloc(&self, size: usize, align: usize) -> Result<usize> {
        let mut free = self.free.lock();

        let mut best: Option<(usize, usize, usize)> = None; // (idx, offset, waste)
        for (idx, block) in free.iter().enumerate() {
            let aligned = align_up(block.offset, align);
            let pad = aligned - block.offset;
            if pad + size > block.size {
                continue;
            }
            let waste = block.size - size - pad;
            if best.map(|(_, _, w)| waste < w).unwrap_or(true) {
                best = Some((idx, aligned, waste));
            }
        }

        let (idx, aligned_offset, _) = best.ok_or(Error::NoSpace)?;
        let block = free[idx];
        let pad = aligned_offset - block.offset;
        let used_end = aligned_offset + size;
        let block_end = block.offset + block.size;

        free.remove(idx);
        if pad > 0 {
            free.push(FreeBlock { offset: block.offset, size: pad });
        }
        if used_end < block_end {
            free.push(FreeBlock { offset: used_end, size: block_end - used_end });
        }

        Ok(aligned_offset)
    }

    /// Returns `(offset, size)` to the free list, coalescing with any
    /// adjacent free blocks.
    pub fn free(&self, offset: usize, size: usize) {
        let mut free = self.free.lock();
        free.push(FreeBlock { offset, size });
        free.sort_by_key(|b| b.offset);

        let mut merged: Vec<FreeBlock> = Vec::with_capacity(free.len());
        for block in free.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.offset + last.size == block.offset {
                    last.size += block.size;
                    continue;
                }
            }
            merged.push(block);
        }
        *free = merged;
    }

    pub fn free_bytes(&self) -> usize {
        self.free.lock().iter().map(|b| b.size).sum()
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    let align = align.max(1);
    (offset + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_within_capacity() {
        let a = ShAlloc::new(1024);
        let off = a.alloc(64, 8).unwrap();
        assert_eq!(off % 8, 0);
    }

    #[test]
    fn test_alloc_exhaustion() {
        let a = ShAlloc::new(128);
        a.alloc(128, 1).unwrap();
        assert!(matches!(a.alloc(1, 1), Err(Error::NoSpace)));
    }

    #[test]
    fn test_free_then_realloc_coalesces() {
        let a = ShAlloc::new(256);
        let off1 = a.alloc(64, 1).unwrap();
        let off2 = a.alloc(64, 1).unwrap();
        a.free(off1, 64);
        a.free(off2, 64);
        assert_eq!(a.free_bytes(), 256);
        let off3 = a.alloc(128, 1).unwrap();
        assert_eq!(off3, 0);
    }
}
