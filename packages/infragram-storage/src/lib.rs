//! infragram-storage - Run identity and per-run artifact storage
//!
//! Every pipeline run owns one location keyed by `(project, run_id)`. The
//! location holds the run manifest and the artifacts written by each step.
//!
//! ## Core Principles
//!
//! 1. **Fresh identity**: `allocate_run` never returns an id twice within a store's lifetime
//! 2. **Atomic writes**: an artifact is either fully written or not present
//! 3. **Absence is not an error**: reads return `Ok(None)` for missing data
//!
//! ## Usage
//!
//! ```rust,ignore
//! use infragram_storage::{FsRunStore, Run, RunStore};
//!
//! let store = FsRunStore::new(".infragram/runs");
//! let run_id = store.allocate_run("shop").await?;
//! store.write_artifact("shop", &run_id, "parsed-graph.json", &bytes).await?;
//! store.write_manifest("shop", &run_id, &Run::new(run_id.clone(), "shop")).await?;
//!
//! for summary in store.list_runs("shop").await? {
//!     println!("{} {}", summary.id, summary.status);
//! }
//! ```

pub mod domain;
pub mod error;
pub mod identity;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    sort_most_recent_first, Run, RunStatus, RunStore, RunSummary, SkippedStep, StepMetrics,
    StepName, StepResult, StepStatus, UnknownStep,
};
pub use identity::{generate_run_id, is_safe_artifact_name, is_safe_id};

#[cfg(feature = "fs")]
pub use infrastructure::FsRunStore;
pub use infrastructure::MemoryRunStore;
