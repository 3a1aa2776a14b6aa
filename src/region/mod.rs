//! REGENV / REGINFO — the shared environment and sub-region manager
//! every other subsystem attaches into, plus the best-fit allocator
//! backing it.

pub mod allocator;
pub mod descriptor;
pub mod env;

pub use allocator::ShAlloc;
pub use descriptor::{RegionDescriptor, RegionType};
pub use env::RegEnv;
