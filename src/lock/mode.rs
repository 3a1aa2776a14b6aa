//! Lock modes and the conflict matrix that governs compatibility between
//! a resource's current holders and a new request.

/// The lock modes the manager understands. `Ng` ("no grab") never
/// conflicts with anything and is mostly useful for probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LockMode {
    Ng = 0,
    Read = 1,
    Write = 2,
    Wait = 3,
    IWrite = 4,
    IRead = 5,
    Iwr = 6,
    /// Uncommitted read: compatible with writers of known provenance.
    Dirty = 7,
    /// Downgrade target for a write lock that has committed its writes
    /// but wants to keep allowing dirty readers.
    WasWrite = 8,
}

impl LockMode {
    pub const COUNT: usize = 9;

    fn idx(self) -> usize {
        self as usize
    }

    pub fn is_write_class(self) -> bool {
        matches!(self, LockMode::Write | LockMode::IWrite | LockMode::Iwr)
    }
}

/// Square conflict table; `conflicts[held][requested]` is true iff a
/// holder in `held` blocks a requester asking for `requested`.
pub struct ConflictMatrix {
    table: [[bool; LockMode::COUNT]; LockMode::COUNT],
}

impl ConflictMatrix {
    /// The manager's default matrix, matching the standard lock-mode
    /// compatibility table used by two-phase locking with intention
    /// modes plus the DIRTY/WWRITE extensions.
    pub fn standard() -> Self {
        use LockMode::*;
        let modes = [Ng, Read, Write, Wait, IWrite, IRead, Iwr, Dirty, WasWrite];
        let mut table = [[false; LockMode::COUNT]; LockMode::COUNT];

        let conflicts = |held: LockMode, req: LockMode| -> bool {
            if held == Ng || req == Ng {
                return false;
            }
            match (held, req) {
                (Read, Read) => false,
                (Read, IRead) => false,
                (IRead, Read) => false,
                (IRead, IRead) => false,
                (WasWrite, Dirty) => false,
                (Dirty, WasWrite) => false,
                (Dirty, Dirty) => false,
                (Dirty, IRead) | (IRead, Dirty) => false,
                (IWrite, IWrite) => false,
                (IWrite, IRead) | (IRead, IWrite) => false,
                _ => true,
            }
        };

        for &h in &modes {
            for &r in &modes {
                table[h.idx()][r.idx()] = conflicts(h, r);
            }
        }

        Self { table }
    }

    pub fn conflicts(&self, held: LockMode, requested: LockMode) -> bool {
        self.table[held.idx()][requested.idx()]
    }
}

impl Default for ConflictMatrix {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LockMode::*;

    #[test]
    fn test_ng_never_conflicts() {
        let m = ConflictMatrix::standard();
        for mode in [Ng, Read, Write, Wait, IWrite, IRead, Iwr, Dirty, WasWrite] {
            assert!(!m.conflicts(Ng, mode));
            assert!(!m.conflicts(mode, Ng));
        }
    }

    #[test]
    fn test_read_read_compatible() {
        let m = ConflictMatrix::standard();
        assert!(!m.conflicts(Read, Read));
    }

    #[test]
    fn test_read_write_conflicts() {
        let m = ConflictMatrix::standard();
        assert!(m.conflicts(Read, Write));
        assert!(m.conflicts(Write, Read));
    }

    #[test]
    fn test_write_write_conflicts() {
        let m = ConflictMatrix::standard();
        assert!(m.conflicts(Write, Write));
    }

    #[test]
    fn test_dirty_compatible_with_wwrite() {
        let m = ConflictMatrix::standard();
        assert!(!m.conflicts(WasWrite, Dirty));
    }
}
