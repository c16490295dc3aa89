//! In-memory adapter for RunStore
//!
//! Same contract as the filesystem adapter, without touching disk. Artifact
//! names can be marked as failing to exercise storage-error handling.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::domain::{sort_most_recent_first, Run, RunStore, RunSummary};
use crate::identity::{
    ensure_safe_artifact_name, ensure_safe_id, generate_run_id, RunIdRegistry,
    MAX_ALLOCATION_ATTEMPTS,
};
use crate::{ErrorKind, Result, StorageError};

#[derive(Debug, Default)]
struct RunSlot {
    artifacts: HashMap<String, Vec<u8>>,
    manifest: Option<Run>,
}

#[derive(Default)]
pub struct MemoryRunStore {
    registry: RunIdRegistry,
    runs: Mutex<HashMap<(String, String), RunSlot>>,
    failing_artifacts: Mutex<HashSet<String>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write of artifact `name` fail with an I/O error
    pub fn fail_writes_of(&self, name: impl Into<String>) {
        self.failing_artifacts.lock().insert(name.into());
    }

    /// Artifact names stored for a run, sorted
    pub fn artifact_names(&self, project: &str, run_id: &str) -> Vec<String> {
        let runs = self.runs.lock();
        let mut names: Vec<_> = runs
            .get(&(project.to_string(), run_id.to_string()))
            .map(|slot| slot.artifacts.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn key(project: &str, run_id: &str) -> (String, String) {
        (project.to_string(), run_id.to_string())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn allocate_run(&self, project: &str) -> Result<String> {
        ensure_safe_id(project)?;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let run_id = generate_run_id(Utc::now());
            if self.registry.reserve(project, &run_id) {
                self.runs
                    .lock()
                    .insert(Self::key(project, &run_id), RunSlot::default());
                return Ok(run_id);
            }
        }
        Err(StorageError::new(
            ErrorKind::Conflict,
            format!("Could not allocate a unique run id for {}", project),
        ))
    }

    async fn pin_run(&self, project: &str, run_id: &str) -> Result<()> {
        ensure_safe_id(project)?;
        ensure_safe_id(run_id)?;
        if !self.registry.reserve(project, run_id) {
            return Err(StorageError::conflict(project, run_id));
        }
        self.runs
            .lock()
            .entry(Self::key(project, run_id))
            .or_default();
        Ok(())
    }

    async fn write_artifact(
        &self,
        project: &str,
        run_id: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<()> {
        ensure_safe_artifact_name(name)?;
        if self.failing_artifacts.lock().contains(name) {
            return Err(StorageError::io(format!(
                "write {}/{}/{}: No space left on device",
                project, run_id, name
            )));
        }

        let mut runs = self.runs.lock();
        let slot = runs
            .get_mut(&Self::key(project, run_id))
            .ok_or_else(|| StorageError::run_not_found(project, run_id))?;
        slot.artifacts.insert(name.to_string(), payload.to_vec());
        Ok(())
    }

    async fn read_artifact(
        &self,
        project: &str,
        run_id: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let runs = self.runs.lock();
        Ok(runs
            .get(&Self::key(project, run_id))
            .and_then(|slot| slot.artifacts.get(name).cloned()))
    }

    async fn write_manifest(&self, project: &str, run_id: &str, run: &Run) -> Result<()> {
        let mut runs = self.runs.lock();
        let slot = runs
            .get_mut(&Self::key(project, run_id))
            .ok_or_else(|| StorageError::run_not_found(project, run_id))?;
        slot.manifest = Some(run.clone());
        Ok(())
    }

    async fn read_manifest(&self, project: &str, run_id: &str) -> Result<Option<Run>> {
        let runs = self.runs.lock();
        Ok(runs
            .get(&Self::key(project, run_id))
            .and_then(|slot| slot.manifest.clone()))
    }

    async fn list_runs(&self, project: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.lock();
        let mut summaries: Vec<_> = runs
            .iter()
            .filter(|((p, _), _)| p == project)
            .filter_map(|(_, slot)| slot.manifest.as_ref().map(RunSummary::from))
            .collect();
        sort_most_recent_first(&mut summaries);
        Ok(summaries)
    }
}
