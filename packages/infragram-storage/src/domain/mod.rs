//! Domain layer for the run store
//!
//! # Domain Models
//!
//! - `Run`: one attempt to execute the diagram pipeline for a project (the manifest)
//! - `StepResult`: the record of one step's execution within a run
//! - `RunSummary`: listing view of a run
//!
//! # Port Trait
//!
//! - `RunStore`: run identity + artifact/manifest persistence
//!
//! # Examples
//!
//! ```rust,ignore
//! use infragram_storage::domain::{Run, RunStore};
//!
//! async fn example(store: impl RunStore) -> Result<()> {
//!     let run_id = store.allocate_run("shop").await?;
//!     store.write_artifact("shop", &run_id, "parsed-graph.json", b"{}").await?;
//!
//!     let run = Run::new(run_id.clone(), "shop");
//!     store.write_manifest("shop", &run_id, &run).await?;
//!
//!     let runs = store.list_runs("shop").await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Pipeline step identifier
///
/// The declaration order is the execution order of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    Parse,
    Enhance,
    Layout,
    Generate,
}

impl StepName {
    /// All steps in execution order
    pub const ALL: [StepName; 4] = [
        StepName::Parse,
        StepName::Enhance,
        StepName::Layout,
        StepName::Generate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Parse => "parse",
            StepName::Enhance => "enhance",
            StepName::Layout => "layout",
            StepName::Generate => "generate",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unknown step name
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown step '{0}'. Valid steps: parse, enhance, layout, generate")]
pub struct UnknownStep(pub String);

impl FromStr for StepName {
    type Err = UnknownStep;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parse" => Ok(StepName::Parse),
            "enhance" => Ok(StepName::Enhance),
            "layout" => Ok(StepName::Layout),
            "generate" => Ok(StepName::Generate),
            _ => Err(UnknownStep(s.to_string())),
        }
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counts inspected on a step's artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetrics {
    #[serde(default)]
    pub nodes: usize,
    #[serde(default)]
    pub edges: usize,
    #[serde(default)]
    pub elements: usize,
}

/// Record of one step's execution within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: StepName,
    pub status: StepStatus,
    /// Artifact written by the step (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Failure description (failed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
}

impl StepResult {
    pub fn pending(step: StepName) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            output_file: None,
            error: None,
            duration: None,
            metrics: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// A step that was deliberately not executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step: StepName,
    pub reason: String,
}

/// Run manifest
///
/// `steps` holds results in execution order. Skipped optional steps are
/// listed in `skipped` and never appear in `steps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub project: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Requested target step (targeted runs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<StepName>,
    /// Override file bound into this run (variant runs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedStep>,
}

impl Run {
    /// Create a pending run
    pub fn new(id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            target: None,
            variant: None,
            steps: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn step(&self, step: StepName) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.step == step)
    }

    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.is_failed())
    }

    pub fn is_skipped(&self, step: StepName) -> bool {
        self.skipped.iter().any(|s| s.step == step)
    }
}

/// Listing view of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    pub project: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<StepName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub step_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<StepName>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            project: run.project.clone(),
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            target: run.target,
            variant: run.variant.clone(),
            step_count: run.steps.len(),
            failed_step: run.failed_step().map(|r| r.step),
        }
    }
}

/// Most recent first: `started_at` descending, ties broken by `id` descending
pub fn sort_most_recent_first(runs: &mut [RunSummary]) {
    runs.sort_by(|a, b| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Run identity + persistence abstraction
///
/// Runs are keyed by `(project, run_id)`, artifacts by
/// `(project, run_id, name)`. Absence is reported as `Ok(None)`, never as an
/// error; callers decide whether a missing artifact is fatal.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Allocate a fresh run id and create its backing location
    ///
    /// Never returns an id handed out earlier by the same store, even for
    /// calls within the same millisecond.
    async fn allocate_run(&self, project: &str) -> Result<String>;

    /// Reserve a caller-chosen run id (variant runs)
    ///
    /// # Errors
    ///
    /// - `Conflict` if the id was already allocated or pinned by this store,
    ///   or a persisted run already occupies that location
    /// - `InvalidId` if the id is not filesystem-safe
    async fn pin_run(&self, project: &str, run_id: &str) -> Result<()>;

    /// Write an artifact; either the full payload lands or nothing does
    async fn write_artifact(
        &self,
        project: &str,
        run_id: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<()>;

    async fn read_artifact(&self, project: &str, run_id: &str, name: &str)
        -> Result<Option<Vec<u8>>>;

    async fn write_manifest(&self, project: &str, run_id: &str, run: &Run) -> Result<()>;

    async fn read_manifest(&self, project: &str, run_id: &str) -> Result<Option<Run>>;

    /// Runs with a manifest, most recent first (see [`sort_most_recent_first`])
    async fn list_runs(&self, project: &str) -> Result<Vec<RunSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(id: &str, secs: i64) -> RunSummary {
        let mut run = Run::new(id, "shop");
        run.started_at = Utc.timestamp_opt(secs, 0).unwrap();
        RunSummary::from(&run)
    }

    #[test]
    fn test_step_name_order_is_execution_order() {
        let mut steps = vec![StepName::Generate, StepName::Parse, StepName::Layout, StepName::Enhance];
        steps.sort();
        assert_eq!(steps, StepName::ALL.to_vec());
    }

    #[test]
    fn test_step_name_from_str() {
        assert_eq!("layout".parse::<StepName>(), Ok(StepName::Layout));
        assert_eq!(" Generate ".parse::<StepName>(), Ok(StepName::Generate));
        let err = "render".parse::<StepName>().unwrap_err();
        assert!(err.to_string().contains("render"));
    }

    #[test]
    fn test_manifest_json_shape() {
        let mut run = Run::new("r1", "shop");
        run.steps.push(StepResult {
            step: StepName::Parse,
            status: StepStatus::Completed,
            output_file: Some("parsed-graph.json".to_string()),
            error: None,
            duration: Some(12),
            metrics: None,
        });

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["steps"][0]["step"], "parse");
        assert_eq!(json["steps"][0]["outputFile"], "parsed-graph.json");
        assert!(json.get("startedAt").is_some());
        assert!(json.get("completedAt").is_none());
        assert!(json["steps"][0].get("error").is_none());
    }

    #[test]
    fn test_summary_reports_failed_step() {
        let mut run = Run::new("r1", "shop");
        run.status = RunStatus::Failed;
        let mut parse = StepResult::pending(StepName::Parse);
        parse.status = StepStatus::Failed;
        parse.error = Some("invalid syntax".to_string());
        run.steps.push(parse);

        let summary = RunSummary::from(&run);
        assert_eq!(summary.failed_step, Some(StepName::Parse));
        assert_eq!(summary.step_count, 1);
    }

    #[test]
    fn test_sort_most_recent_first_breaks_ties_by_id() {
        let mut runs = vec![summary("a", 10), summary("c", 20), summary("b", 20)];
        sort_most_recent_first(&mut runs);

        let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
