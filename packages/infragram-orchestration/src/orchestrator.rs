use crate::config::{EnhancePolicy, OrchestratorConfig};
use crate::dag::PipelinePlan;
use crate::error::{OrchestratorError, Result};
use crate::executor::{SkipReason, StepExecutor};
use crate::pipeline::StepContext;
use crate::registry::ProjectEntry;
use crate::run::RunStateMachine;
use crate::sources::{Credential, SourceFileLister};
use crate::stages::default_handlers;
use crate::variants::{assign_unique_run_ids, discover_variants, Variant};
use infragram_storage::{Run, RunStatus, RunStore, StepName};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Which steps a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// `parse, enhance?, layout, generate`
    Full,
    /// Dependency chain through one step
    Target(StepName),
}

impl RunMode {
    pub fn target(&self) -> StepName {
        match self {
            RunMode::Full => StepName::Generate,
            RunMode::Target(step) => *step,
        }
    }
}

/// One run to execute
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project: Arc<ProjectEntry>,
    pub mode: RunMode,
    /// Caller-chosen id (variant fan-out); a fresh id is allocated otherwise
    pub run_id: Option<String>,
    pub variant: Option<Variant>,
}

impl RunRequest {
    pub fn new(project: Arc<ProjectEntry>, mode: RunMode) -> Self {
        Self {
            project,
            mode,
            run_id: None,
            variant: None,
        }
    }

    pub fn for_variant(project: Arc<ProjectEntry>, mode: RunMode, variant: Variant) -> Self {
        Self {
            project,
            mode,
            run_id: Some(variant.run_id.clone()),
            variant: Some(variant),
        }
    }
}

/// Outcome of one run within an invocation
#[derive(Debug)]
pub struct RunReport {
    /// Variant run id, or `default` for a single run
    pub label: String,
    pub variant: Option<Variant>,
    /// `Err` when the run could not be set up or recorded
    pub outcome: Result<Run>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, Ok(run) if run.status == RunStatus::Completed)
    }
}

/// Outcome of one invocation (one run, or one run per variant)
#[derive(Debug, Default)]
pub struct InvocationOutcome {
    /// In variant order
    pub reports: Vec<RunReport>,
}

impl InvocationOutcome {
    /// `true` iff every run completed
    pub fn succeeded(&self) -> bool {
        !self.reports.is_empty() && self.reports.iter().all(RunReport::succeeded)
    }

    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| !r.succeeded()).count()
    }
}

/// Pipeline orchestrator
///
/// Drives one run through the step executor, or fans an invocation out into
/// one run per discovered variant. Runs are fail-fast; fan-out is not.
pub struct PipelineOrchestrator {
    executor: StepExecutor,
    sources: Arc<dyn SourceFileLister>,
    enhance: EnhancePolicy,
    credential: Option<Credential>,
    parallel_variants: bool,
}

impl PipelineOrchestrator {
    pub fn new(executor: StepExecutor, sources: Arc<dyn SourceFileLister>) -> Self {
        Self {
            executor,
            sources,
            enhance: EnhancePolicy::default(),
            credential: None,
            parallel_variants: false,
        }
    }

    /// Default pipeline and handlers, configured from `config`
    pub fn from_config(
        config: &OrchestratorConfig,
        store: Arc<dyn RunStore>,
        sources: Arc<dyn SourceFileLister>,
        credential: Option<Credential>,
    ) -> Result<Self> {
        let executor = StepExecutor::new(PipelinePlan::default_pipeline()?, store)
            .with_handlers(default_handlers(config));
        Ok(Self::new(executor, sources)
            .with_enhance_policy(config.enhance)
            .with_credential(credential)
            .with_parallel_variants(config.parallel_variants))
    }

    pub fn with_enhance_policy(mut self, policy: EnhancePolicy) -> Self {
        self.enhance = policy;
        self
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_parallel_variants(mut self, parallel: bool) -> Self {
        self.parallel_variants = parallel;
        self
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        self.executor.store()
    }

    fn skip_reasons(&self) -> HashMap<StepName, SkipReason> {
        let mut skip = HashMap::new();
        if let Some(reason) = self.enhance.skip_reason(self.credential.is_some()) {
            let reason = reason.to_string();
            let reason = match self.enhance {
                EnhancePolicy::Never => SkipReason::Disabled(reason),
                _ => SkipReason::Unavailable(reason),
            };
            skip.insert(StepName::Enhance, reason);
        }
        skip
    }

    /// `execute_run` inside a span naming the variant, so interleaved
    /// concurrent output stays attributable
    async fn execute_variant(&self, request: RunRequest) -> Result<Run> {
        let id = request.run_id.clone().unwrap_or_default();
        self.execute_run(request)
            .instrument(info_span!("variant", id = %id))
            .await
    }

    /// Execute one run and persist its manifest
    ///
    /// Step failures yield `Ok` with a `failed` run. `Err` is reserved for
    /// failures to allocate or record the run.
    pub async fn execute_run(&self, request: RunRequest) -> Result<Run> {
        let store = self.store();
        let project_id = request.project.id.as_str();
        let target = request.mode.target();

        let run_id = match &request.run_id {
            Some(id) => {
                store.pin_run(project_id, id).await?;
                id.clone()
            }
            None => store.allocate_run(project_id).await?,
        };

        let mut run = Run::new(run_id.clone(), project_id);
        if let RunMode::Target(step) = request.mode {
            run.target = Some(step);
        }
        run.variant = request.variant.as_ref().map(|v| v.values_file.clone());
        store.write_manifest(project_id, &run_id, &run).await?;

        info!(
            "Starting run {} for project {}{}",
            run_id,
            project_id,
            run.variant
                .as_deref()
                .map(|v| format!(" (values: {})", v))
                .unwrap_or_default()
        );
        info!("Execution plan:\n{}", self.executor.plan().execution_plan(target));

        let ctx = StepContext {
            project: request.project.clone(),
            run_id: run_id.clone(),
            variant: request.variant.clone(),
            credential: self.credential.clone(),
            sources: self.sources.clone(),
        };

        let start = Instant::now();
        let mut sm = RunStateMachine::new(run);
        if let Err(e) = self
            .executor
            .execute_up_to(&mut sm, target, &ctx, &self.skip_reasons())
            .await
        {
            error!("Run {}: aborted: {}", run_id, e);
            return Err(e);
        }

        let status = sm.finish()?;
        let run = sm.into_run();
        store.write_manifest(project_id, &run_id, &run).await?;

        let elapsed = start.elapsed().as_millis();
        match run.failed_step() {
            Some(failed) => error!(
                "Run {} failed at step {} after {}ms: {}",
                run_id,
                failed.step,
                elapsed,
                failed.error.as_deref().unwrap_or("unknown error")
            ),
            None => info!(
                "Run {} {} - {} steps in {}ms",
                run_id,
                status,
                run.steps.len(),
                elapsed
            ),
        }
        Ok(run)
    }

    /// Execute an invocation: one run, or one run per variant
    ///
    /// Every variant is attempted even after an earlier one fails.
    pub async fn execute(&self, project: &ProjectEntry, mode: RunMode) -> InvocationOutcome {
        let project = Arc::new(project.clone());

        let files = match self.sources.list_source_files(&project).await {
            Ok(files) => files,
            Err(e) => {
                // The parse step reports the same problem inside a run record
                warn!(
                    "Could not list sources for {}: {}; running without variants",
                    project.id, e
                );
                Vec::new()
            }
        };
        let variants = assign_unique_run_ids(discover_variants(&files));

        if variants.is_empty() {
            let outcome = self
                .execute_run(RunRequest::new(project.clone(), mode))
                .await;
            return InvocationOutcome {
                reports: vec![RunReport {
                    label: "default".to_string(),
                    variant: None,
                    outcome,
                }],
            };
        }

        info!(
            "Project {}: {} variants ({})",
            project.id,
            variants.len(),
            variants
                .iter()
                .map(|v| v.run_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let requests: Vec<RunRequest> = variants
            .iter()
            .cloned()
            .map(|v| RunRequest::for_variant(project.clone(), mode, v))
            .collect();

        let outcomes: Vec<Result<Run>> = if self.parallel_variants {
            futures::future::join_all(requests.into_iter().map(|r| self.execute_variant(r)))
                .await
        } else {
            let mut outcomes = Vec::with_capacity(requests.len());
            for request in requests {
                outcomes.push(self.execute_variant(request).await);
            }
            outcomes
        };

        let reports: Vec<RunReport> = variants
            .into_iter()
            .zip(outcomes)
            .map(|(variant, outcome)| {
                if let Err(e) = &outcome {
                    error!("Variant {} could not run: {}", variant.run_id, e);
                }
                RunReport {
                    label: variant.run_id.clone(),
                    variant: Some(variant),
                    outcome,
                }
            })
            .collect();

        let outcome = InvocationOutcome { reports };
        if !outcome.succeeded() {
            warn!(
                "Project {}: {} of {} variant runs failed",
                project.id,
                outcome.failed_count(),
                outcome.reports.len()
            );
        }
        outcome
    }

    /// Fetch a run manifest
    pub async fn run(&self, project: &str, run_id: &str) -> Result<Run> {
        self.store()
            .read_manifest(project, run_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Storage(infragram_storage::StorageError::run_not_found(
                    project, run_id,
                ))
            })
    }
}
