//! Run identity: id generation and the per-process allocation registry

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use uuid::Uuid;

use crate::{Result, StorageError};

/// Attempts before `allocate_run` gives up on collisions
pub const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// Generate a run id: `YYYYMMDDTHHMMSSmmmZ-xxxxxxxx`
///
/// Millisecond UTC timestamp (sorts chronologically) followed by 32 random
/// bits, so two ids generated in the same millisecond still differ.
pub fn generate_run_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), &random[..8])
}

/// `true` if `id` can be used as a single path component
///
/// Allowed: `[A-Za-z0-9._-]`, non-empty, not `.`/`..`. Leading dots are
/// fine (`.eu` is a valid variant id).
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Artifact names additionally must not start with `.`: dot-prefixed names
/// inside a run directory belong to in-flight temp files.
pub fn is_safe_artifact_name(name: &str) -> bool {
    is_safe_id(name) && !name.starts_with('.')
}

pub fn ensure_safe_id(id: &str) -> Result<()> {
    if is_safe_id(id) {
        Ok(())
    } else {
        Err(StorageError::invalid_id(id))
    }
}

pub fn ensure_safe_artifact_name(name: &str) -> Result<()> {
    if is_safe_artifact_name(name) {
        Ok(())
    } else {
        Err(StorageError::invalid_id(name))
    }
}

/// Ids handed out by one store instance
///
/// A reserved `(project, run_id)` pair is never released: a run location is
/// not reused for the lifetime of the store.
#[derive(Debug, Default)]
pub struct RunIdRegistry {
    reserved: Mutex<HashSet<(String, String)>>,
}

impl RunIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the pair was already reserved
    pub fn reserve(&self, project: &str, run_id: &str) -> bool {
        self.reserved
            .lock()
            .insert((project.to_string(), run_id.to_string()))
    }

    pub fn contains(&self, project: &str, run_id: &str) -> bool {
        self.reserved
            .lock()
            .contains(&(project.to_string(), run_id.to_string()))
    }
}
