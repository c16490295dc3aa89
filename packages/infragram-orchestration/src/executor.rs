use crate::dag::{artifact_name, PipelinePlan, StepDescriptor};
use crate::error::{OrchestratorError, Result};
use crate::pipeline::{StepContext, StepHandler, StepInput, StepOutput};
use crate::run::RunStateMachine;
use infragram_storage::{RunStore, StepName, StepResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Why an optional step is left out of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Passed over inside a chain; still runs when it is the target
    Unavailable(String),
    /// Never runs; targeting it fails the step without invoking its handler
    Disabled(String),
}

impl SkipReason {
    pub fn reason(&self) -> &str {
        match self {
            SkipReason::Unavailable(reason) | SkipReason::Disabled(reason) => reason,
        }
    }
}

/// Step executor: runs the chain of steps a target needs, fail-fast
pub struct StepExecutor {
    plan: Arc<PipelinePlan>,
    handlers: HashMap<StepName, Arc<dyn StepHandler>>,
    store: Arc<dyn RunStore>,
}

impl StepExecutor {
    pub fn new(plan: PipelinePlan, store: Arc<dyn RunStore>) -> Self {
        Self {
            plan: Arc::new(plan),
            handlers: HashMap::new(),
            store,
        }
    }

    /// Register a step handler
    pub fn register_handler(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.step(), handler);
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn StepHandler>>) -> Self {
        for handler in handlers {
            self.register_handler(handler);
        }
        self
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Execute every step up to and including `target`
    ///
    /// Optional steps listed in `skip` are recorded as skipped unless they
    /// are the target itself. A targeted `Disabled` step fails instead. The
    /// chain halts at the first failed step.
    /// Returns the target's result, or the result of the step that halted
    /// the chain.
    ///
    /// Step failures are recorded in the run, not returned as errors. An
    /// `Err` means the run's bookkeeping itself went wrong.
    pub async fn execute_up_to(
        &self,
        sm: &mut RunStateMachine,
        target: StepName,
        ctx: &StepContext,
        skip: &HashMap<StepName, SkipReason>,
    ) -> Result<StepResult> {
        let chain = self.plan.chain_to(target)?;
        let run_id = ctx.run_id.clone();

        for desc in chain {
            let step = desc.name;

            let skip_reason = skip.get(&step);
            if let Some(reason) = skip_reason {
                if desc.optional && step != target {
                    info!("Run {}: step {} skipped ({})", run_id, step, reason.reason());
                    sm.skip_step(step, reason.reason())?;
                    continue;
                }
            }

            sm.begin_step(step)?;
            let start = Instant::now();
            sm.start_step()?;
            info!("Run {}: executing step {} ({})", run_id, step, desc.label);

            let outcome = if let Some(SkipReason::Disabled(reason)) = skip_reason {
                Err(OrchestratorError::configuration(format!(
                    "{} but step {} was requested",
                    reason, step
                )))
            } else {
                let skipped: HashSet<StepName> =
                    sm.run().skipped.iter().map(|s| s.step).collect();
                match self.run_step(desc, &skipped, ctx).await {
                    Ok(output) => self.persist(step, output, ctx).await,
                    Err(e) => Err(e),
                }
            };
            let elapsed = start.elapsed().as_millis() as u64;

            match outcome {
                Ok((file, metrics)) => {
                    info!(
                        "Run {}: step {} completed - {} nodes, {} edges, {} elements in {}ms",
                        run_id, step, metrics.nodes, metrics.edges, metrics.elements, elapsed
                    );
                    sm.complete_step(file, elapsed, metrics)?;
                }
                Err(e) => {
                    error!(
                        "Run {}: step {} failed [{}]: {}",
                        run_id,
                        step,
                        e.category(),
                        e
                    );
                    sm.fail_step(e.to_string(), elapsed)?;
                    break;
                }
            }
        }

        sm.run()
            .step(target)
            .or_else(|| sm.last_result())
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::InvalidStateTransition {
                    from: "no step executed".to_string(),
                    to: target.to_string(),
                }
            })
    }

    /// Load inputs and run the handler on its own task
    async fn run_step(
        &self,
        desc: &StepDescriptor,
        skipped: &HashSet<StepName>,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let handler = self
            .handlers
            .get(&desc.name)
            .ok_or_else(|| OrchestratorError::StepNotRegistered(desc.name.to_string()))?
            .clone();

        let input = self.load_inputs(desc, skipped, ctx).await?;

        let step_ctx = ctx.clone();
        let task = tokio::spawn(async move { handler.execute(input, &step_ctx).await });

        match task.await {
            Ok(result) => result,
            Err(join_err) => Err(OrchestratorError::step(format!(
                "step {} panicked: {}",
                desc.name, join_err
            ))),
        }
    }

    async fn load_inputs(
        &self,
        desc: &StepDescriptor,
        skipped: &HashSet<StepName>,
        ctx: &StepContext,
    ) -> Result<StepInput> {
        let mut input = StepInput::new();
        for dep in &desc.depends_on {
            let source = self.plan.resolve_input(*dep, |s| skipped.contains(&s))?;
            let name = artifact_name(source);

            let bytes = self
                .store
                .read_artifact(&ctx.project.id, &ctx.run_id, name)
                .await?
                .ok_or_else(|| {
                    OrchestratorError::MissingDependency(format!(
                        "artifact {} required by {} not found",
                        name, desc.name
                    ))
                })?;

            let value: serde_json::Value = serde_json::from_slice(&bytes)?;
            debug!(
                "Run {}: loaded {} ({} bytes) as {} input for {}",
                ctx.run_id,
                name,
                bytes.len(),
                dep,
                desc.name
            );
            input.insert(*dep, value);
        }
        Ok(input)
    }

    async fn persist(
        &self,
        step: StepName,
        output: StepOutput,
        ctx: &StepContext,
    ) -> Result<(String, infragram_storage::StepMetrics)> {
        let name = artifact_name(step);
        let bytes = serde_json::to_vec_pretty(&output.artifact)?;
        self.store
            .write_artifact(&ctx.project.id, &ctx.run_id, name, &bytes)
            .await?;
        Ok((name.to_string(), output.metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Node};
    use crate::registry::ProjectEntry;
    use crate::sources::MemorySourceLister;
    use async_trait::async_trait;
    use infragram_storage::{MemoryRunStore, Run, StepStatus};

    struct FixedStep {
        step: StepName,
        fail: Option<&'static str>,
    }

    #[async_trait]
    impl StepHandler for FixedStep {
        fn step(&self) -> StepName {
            self.step
        }

        async fn execute(&self, input: StepInput, _ctx: &StepContext) -> Result<StepOutput> {
            if let Some(msg) = self.fail {
                return Err(OrchestratorError::step(msg));
            }
            let mut graph: Graph = [StepName::Layout, StepName::Enhance, StepName::Parse]
                .into_iter()
                .find_map(|dep| input.get(dep).cloned())
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            graph.add_node(Node::new(self.step.as_str(), self.step.as_str(), "service"));
            StepOutput::from_graph(&graph)
        }
    }

    struct PanickingStep;

    #[async_trait]
    impl StepHandler for PanickingStep {
        fn step(&self) -> StepName {
            StepName::Layout
        }

        async fn execute(&self, _input: StepInput, _ctx: &StepContext) -> Result<StepOutput> {
            panic!("layout exploded");
        }
    }

    fn ok(step: StepName) -> Arc<dyn StepHandler> {
        Arc::new(FixedStep { step, fail: None })
    }

    async fn setup(
        handlers: Vec<Arc<dyn StepHandler>>,
    ) -> (StepExecutor, Arc<MemoryRunStore>, RunStateMachine, StepContext) {
        let store = Arc::new(MemoryRunStore::new());
        let run_id = store.allocate_run("shop").await.unwrap();
        let executor = StepExecutor::new(PipelinePlan::default_pipeline().unwrap(), store.clone())
            .with_handlers(handlers);
        let ctx = StepContext {
            project: Arc::new(ProjectEntry::new("shop", "Shop", "repo")),
            run_id: run_id.clone(),
            variant: None,
            credential: None,
            sources: Arc::new(MemorySourceLister::new()),
        };
        (executor, store, RunStateMachine::new(Run::new(run_id, "shop")), ctx)
    }

    fn skip_enhance() -> HashMap<StepName, SkipReason> {
        HashMap::from([(
            StepName::Enhance,
            SkipReason::Unavailable("no credential".to_string()),
        )])
    }

    #[tokio::test]
    async fn test_target_layout_without_enhance_builds_on_parse() {
        let (executor, store, mut sm, ctx) =
            setup(vec![ok(StepName::Parse), ok(StepName::Layout)]).await;

        let result = executor
            .execute_up_to(&mut sm, StepName::Layout, &ctx, &skip_enhance())
            .await
            .unwrap();

        assert_eq!(result.step, StepName::Layout);
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output_file.as_deref(), Some("layout-graph.json"));
        assert_eq!(result.metrics.unwrap().nodes, 2);

        let run = sm.run();
        let steps: Vec<_> = run.steps.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![StepName::Parse, StepName::Layout]);
        assert!(run.is_skipped(StepName::Enhance));
        assert_eq!(
            store.artifact_names("shop", &ctx.run_id),
            vec!["layout-graph.json", "parsed-graph.json"]
        );
    }

    #[tokio::test]
    async fn test_first_failure_halts_chain() {
        let (executor, store, mut sm, ctx) = setup(vec![
            Arc::new(FixedStep {
                step: StepName::Parse,
                fail: Some("invalid syntax"),
            }),
            ok(StepName::Layout),
            ok(StepName::Generate),
        ])
        .await;

        let result = executor
            .execute_up_to(&mut sm, StepName::Generate, &ctx, &skip_enhance())
            .await
            .unwrap();

        assert_eq!(result.step, StepName::Parse);
        assert_eq!(result.error.as_deref(), Some("invalid syntax"));
        assert_eq!(sm.run().steps.len(), 1);
        assert!(store.artifact_names("shop", &ctx.run_id).is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let (executor, _store, mut sm, ctx) =
            setup(vec![ok(StepName::Parse), Arc::new(PanickingStep)]).await;

        let result = executor
            .execute_up_to(&mut sm, StepName::Layout, &ctx, &skip_enhance())
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("panicked"));
        assert!(result.duration.is_some());
    }

    #[tokio::test]
    async fn test_storage_error_fails_step() {
        let (executor, store, mut sm, ctx) = setup(vec![ok(StepName::Parse)]).await;
        store.fail_writes_of("parsed-graph.json");

        let result = executor
            .execute_up_to(&mut sm, StepName::Parse, &ctx, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("No space left on device"));
        assert!(result.output_file.is_none());
    }

    #[tokio::test]
    async fn test_missing_handler_fails_step() {
        let (executor, _store, mut sm, ctx) = setup(vec![ok(StepName::Parse)]).await;

        let result = executor
            .execute_up_to(&mut sm, StepName::Layout, &ctx, &skip_enhance())
            .await
            .unwrap();

        assert_eq!(result.step, StepName::Layout);
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("not registered"));
    }

    #[tokio::test]
    async fn test_explicit_target_is_never_skipped() {
        let (executor, _store, mut sm, ctx) =
            setup(vec![ok(StepName::Parse), ok(StepName::Enhance)]).await;

        let result = executor
            .execute_up_to(&mut sm, StepName::Enhance, &ctx, &skip_enhance())
            .await
            .unwrap();

        assert_eq!(result.step, StepName::Enhance);
        assert_eq!(result.status, StepStatus::Completed);
        assert!(sm.run().skipped.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_target_fails_without_running_handler() {
        let (executor, store, mut sm, ctx) =
            setup(vec![ok(StepName::Parse), ok(StepName::Enhance)]).await;
        let skip = HashMap::from([(
            StepName::Enhance,
            SkipReason::Disabled("enhancement disabled".to_string()),
        )]);

        let result = executor
            .execute_up_to(&mut sm, StepName::Enhance, &ctx, &skip)
            .await
            .unwrap();

        assert_eq!(result.step, StepName::Enhance);
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Configuration error: enhancement disabled but step enhance was requested")
        );
        assert_eq!(
            store.artifact_names("shop", &ctx.run_id),
            vec!["parsed-graph.json"]
        );
    }

    #[tokio::test]
    async fn test_disabled_step_is_skipped_inside_chain() {
        let (executor, _store, mut sm, ctx) =
            setup(vec![ok(StepName::Parse), ok(StepName::Enhance), ok(StepName::Layout)]).await;
        let skip = HashMap::from([(
            StepName::Enhance,
            SkipReason::Disabled("enhancement disabled".to_string()),
        )]);

        let result = executor
            .execute_up_to(&mut sm, StepName::Layout, &ctx, &skip)
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        assert!(sm.run().is_skipped(StepName::Enhance));
    }
}
