//! Infrastructure layer - Storage adapters
//!
//! - `fs`: one directory per (project, run) under a data root
//! - `memory`: process-local store for tests and dry runs

#[cfg(feature = "fs")]
pub mod fs;
pub mod memory;

#[cfg(feature = "fs")]
pub use fs::FsRunStore;
pub use memory::MemoryRunStore;
