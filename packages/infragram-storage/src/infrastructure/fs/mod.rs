//! Filesystem adapter for RunStore
//!
//! Layout:
//!
//! ```text
//! <root>/<project>/<run_id>/run.json            manifest
//! <root>/<project>/<run_id>/<artifact name>     artifacts
//! ```
//!
//! Every write goes to a dot-prefixed temp file in the run directory, is
//! synced, then renamed over the destination.

use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{sort_most_recent_first, Run, RunStore, RunSummary};
use crate::identity::{
    ensure_safe_artifact_name, ensure_safe_id, generate_run_id, RunIdRegistry,
    MAX_ALLOCATION_ATTEMPTS,
};
use crate::{ErrorKind, Result, StorageError};

/// Manifest file name inside a run directory
pub const MANIFEST_FILE: &str = "run.json";

pub struct FsRunStore {
    root: PathBuf,
    registry: RunIdRegistry,
}

impl FsRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry: RunIdRegistry::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    pub fn run_dir(&self, project: &str, run_id: &str) -> PathBuf {
        self.project_dir(project).join(run_id)
    }

    fn checked_run_dir(&self, project: &str, run_id: &str) -> Result<PathBuf> {
        ensure_safe_id(project)?;
        ensure_safe_id(run_id)?;
        Ok(self.run_dir(project, run_id))
    }

    async fn existing_run_dir(&self, project: &str, run_id: &str) -> Result<PathBuf> {
        let dir = self.checked_run_dir(project, run_id)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::run_not_found(project, run_id)),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(StorageError::run_not_found(project, run_id))
            }
            Err(e) => Err(StorageError::from_io(dir.display(), e)),
        }
    }

    /// Atomic write: tmp file + fsync + rename; the tmp file never survives
    async fn write_atomic(dir: &Path, name: &str, payload: &[u8]) -> Result<()> {
        let dest = dir.join(name);
        let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(payload).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &dest).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != IoErrorKind::NotFound {
                    warn!("Failed to remove temp file {}: {}", tmp.display(), cleanup);
                }
            }
            return Err(StorageError::from_io(format!("write {}", dest.display()), e));
        }

        debug!("Wrote {} ({} bytes)", dest.display(), payload.len());
        Ok(())
    }

    /// `true` if `dir` holds a manifest or any artifact (temp files aside)
    async fn holds_run_data(dir: &Path) -> Result<bool> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| StorageError::from_io(dir.display(), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(dir.display(), e))?
        {
            if !entry.file_name().to_string_lossy().starts_with('.') {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_io(format!("read {}", path.display()), e)),
        }
    }
}

#[async_trait]
impl RunStore for FsRunStore {
    async fn allocate_run(&self, project: &str) -> Result<String> {
        ensure_safe_id(project)?;
        let project_dir = self.project_dir(project);
        fs::create_dir_all(&project_dir)
            .await
            .map_err(|e| StorageError::from_io(project_dir.display(), e))?;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let run_id = generate_run_id(Utc::now());
            if !self.registry.reserve(project, &run_id) {
                continue;
            }

            // create_dir (not create_dir_all): an existing directory is a collision
            let dir = project_dir.join(&run_id);
            match fs::create_dir(&dir).await {
                Ok(()) => {
                    debug!("Allocated run {}/{}", project, run_id);
                    return Ok(run_id);
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::from_io(dir.display(), e)),
            }
        }

        Err(StorageError::new(
            ErrorKind::Conflict,
            format!(
                "Could not allocate a unique run id for {} after {} attempts",
                project, MAX_ALLOCATION_ATTEMPTS
            ),
        ))
    }

    async fn pin_run(&self, project: &str, run_id: &str) -> Result<()> {
        let dir = self.checked_run_dir(project, run_id)?;
        if !self.registry.reserve(project, run_id) {
            return Err(StorageError::conflict(project, run_id));
        }
        let project_dir = self.project_dir(project);
        fs::create_dir_all(&project_dir)
            .await
            .map_err(|e| StorageError::from_io(project_dir.display(), e))?;

        match fs::create_dir(&dir).await {
            Ok(()) => {}
            // Left behind by another store instance: only an empty location may be taken over
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                if Self::holds_run_data(&dir).await? {
                    return Err(StorageError::conflict(project, run_id));
                }
                debug!("Reusing empty run directory {}/{}", project, run_id);
            }
            Err(e) => return Err(StorageError::from_io(dir.display(), e)),
        }
        debug!("Pinned run {}/{}", project, run_id);
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
        let dir = self.existing_run_dir(project, run_id).await?;
        Self::write_atomic(&dir, name, payload).await
    }

    async fn read_artifact(
        &self,
        project: &str,
        run_id: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>> {
        ensure_safe_artifact_name(name)?;
        let dir = self.checked_run_dir(project, run_id)?;
        Self::read_optional(&dir.join(name)).await
    }

    async fn write_manifest(&self, project: &str, run_id: &str, run: &Run) -> Result<()> {
        let dir = self.existing_run_dir(project, run_id).await?;
        let payload = serde_json::to_vec_pretty(run)?;
        Self::write_atomic(&dir, MANIFEST_FILE, &payload).await
    }

    async fn read_manifest(&self, project: &str, run_id: &str) -> Result<Option<Run>> {
        let dir = self.checked_run_dir(project, run_id)?;
        match Self::read_optional(&dir.join(MANIFEST_FILE)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_runs(&self, project: &str) -> Result<Vec<RunSummary>> {
        ensure_safe_id(project)?;
        let project_dir = self.project_dir(project);

        let mut entries = match fs::read_dir(&project_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_io(project_dir.display(), e)),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(project_dir.display(), e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !entry.path().is_dir() {
                continue;
            }

            match self.read_manifest(project, &name).await {
                Ok(Some(run)) => runs.push(RunSummary::from(&run)),
                Ok(None) => debug!("Skipping {}/{}: no manifest", project, name),
                Err(e) => warn!("Skipping {}/{}: unreadable manifest: {}", project, name, e),
            }
        }

        sort_most_recent_first(&mut runs);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsRunStore) {
        let dir = TempDir::new().unwrap();
        let store = FsRunStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_allocate_run_creates_directory() {
        let (_tmp, store) = store();
        let run_id = store.allocate_run("shop").await.unwrap();

        assert!(store.run_dir("shop", &run_id).is_dir());
    }

    #[tokio::test]
    async fn test_allocate_run_never_repeats() {
        let (_tmp, store) = store();
        let mut ids = HashSet::new();
        for _ in 0..200 {
            let id = store.allocate_run("shop").await.unwrap();
            assert!(ids.insert(id));
        }
    }

    #[tokio::test]
    async fn test_allocate_rejects_unsafe_project() {
        let (_tmp, store) = store();
        let err = store.allocate_run("../etc").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidId);
    }

    #[tokio::test]
    async fn test_pin_run_conflicts_on_reuse() {
        let (_tmp, store) = store();
        store.pin_run("shop", "prod").await.unwrap();

        let err = store.pin_run("shop", "prod").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_pin_run_refuses_existing_run_from_another_store() {
        let tmp = TempDir::new().unwrap();
        let first = FsRunStore::new(tmp.path());
        first.pin_run("shop", "prod").await.unwrap();
        let mut run = Run::new("prod", "shop");
        run.status = RunStatus::Completed;
        first.write_manifest("shop", "prod", &run).await.unwrap();
        first
            .write_artifact("shop", "prod", "diagram.excalidraw", b"{}")
            .await
            .unwrap();

        let second = FsRunStore::new(tmp.path());
        let err = second.pin_run("shop", "prod").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let kept = second.read_manifest("shop", "prod").await.unwrap().unwrap();
        assert_eq!(kept.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_pin_run_takes_over_empty_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("shop").join("prod")).unwrap();
        std::fs::write(tmp.path().join("shop/prod/.run.json.0.tmp"), b"").unwrap();

        let store = FsRunStore::new(tmp.path());
        store.pin_run("shop", "prod").await.unwrap();
    }

    #[tokio::test]
    async fn test_dot_prefixed_run_ids_are_listed() {
        let (_tmp, store) = store();
        store.pin_run("shop", ".eu").await.unwrap();
        store
            .write_manifest("shop", ".eu", &Run::new(".eu", "shop"))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_runs("shop")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![".eu"]);
        assert!(store
            .write_artifact("shop", ".eu", ".hidden", b"{}")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_artifact_roundtrip_and_absence() {
        let (_tmp, store) = store();
        let run_id = store.allocate_run("shop").await.unwrap();

        store
            .write_artifact("shop", &run_id, "parsed-graph.json", b"{\"nodes\":[]}")
            .await
            .unwrap();

        let loaded = store
            .read_artifact("shop", &run_id, "parsed-graph.json")
            .await
            .unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"{\"nodes\":[]}"[..]));

        let missing = store
            .read_artifact("shop", &run_id, "layout-graph.json")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (_tmp, store) = store();
        let run_id = store.allocate_run("shop").await.unwrap();
        store
            .write_artifact("shop", &run_id, "diagram.excalidraw", b"{}")
            .await
            .unwrap();

        let names: Vec<_> = std::fs::read_dir(store.run_dir("shop", &run_id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["diagram.excalidraw".to_string()]);
    }

    #[tokio::test]
    async fn test_write_to_unallocated_run_fails() {
        let (_tmp, store) = store();
        let err = store
            .write_artifact("shop", "nope", "parsed-graph.json", b"{}")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RunNotFound);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_artifact() {
        let (_tmp, store) = store();
        let run_id = store.allocate_run("shop").await.unwrap();
        store
            .write_artifact("shop", &run_id, "out", b"old")
            .await
            .unwrap();

        // A directory in place of the destination makes the rename fail
        let dir = store.run_dir("shop", &run_id);
        std::fs::create_dir(dir.join("blocked")).unwrap();
        std::fs::write(dir.join("blocked").join("child"), b"x").unwrap();
        let err = store.write_artifact("shop", &run_id, "blocked", b"new").await;
        assert!(err.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(
            store.read_artifact("shop", &run_id, "out").await.unwrap().as_deref(),
            Some(&b"old"[..])
        );
    }

    #[tokio::test]
    async fn test_manifest_roundtrip() {
        let (_tmp, store) = store();
        let run_id = store.allocate_run("shop").await.unwrap();

        let mut run = Run::new(run_id.clone(), "shop");
        run.status = RunStatus::Completed;
        store.write_manifest("shop", &run_id, &run).await.unwrap();

        let loaded = store.read_manifest("shop", &run_id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
        assert!(store.read_manifest("shop", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_most_recent_first() {
        let (_tmp, store) = store();

        for (id, secs) in [("a", 100), ("b", 300), ("c", 300), ("d", 200)] {
            store.pin_run("shop", id).await.unwrap();
            let mut run = Run::new(id, "shop");
            run.started_at = Utc.timestamp_opt(secs, 0).unwrap();
            store.write_manifest("shop", id, &run).await.unwrap();
        }
        // Allocated but never written: not listed
        store.allocate_run("shop").await.unwrap();

        let ids: Vec<_> = store
            .list_runs("shop")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }

    #[tokio::test]
    async fn test_list_runs_unknown_project_is_empty() {
        let (_tmp, store) = store();
        assert!(store.list_runs("ghost").await.unwrap().is_empty());
    }
}
