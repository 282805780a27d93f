//! Device environment probing: storage volumes and CPU architecture.

mod arch;
mod storage;

pub use arch::{detect_architecture, Architecture, ArchitectureQuery, UnameQuery};
pub use storage::{select_best, SpaceQuery, StatvfsSpace, StorageCandidate, StorageProbe};
