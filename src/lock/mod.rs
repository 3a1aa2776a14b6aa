//! DB_LOCKREGION — the two-phase lock manager: lock modes and their
//! conflict matrix, locker identity and id allocation, lockable object
//! state, individual lock requests, and the manager tying it together.

pub mod detect;
pub mod lock;
pub mod locker;
pub mod manager;
pub mod mode;
pub mod object;

pub use detect::{DeadlockDetector, GraphWalkDetector, LockerStats, WaitEdge};
pub use lock::{Lock, LockStatus};
pub use locker::{Locker, LockerFlags, LockerId, LockerIdAllocator};
pub use manager::{LockManager, LockOp, LockOpResult, TimeoutOp};
pub use mode::{ConflictMatrix, LockMode};
pub use object::{Entry, GenCounter, LockObject, ObjectKey, WaitPosition};
