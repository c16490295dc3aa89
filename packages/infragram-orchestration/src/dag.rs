use crate::error::{OrchestratorError, Result};
use infragram_storage::StepName;
use std::collections::HashSet;

/// Artifact names, one per producing step
pub const PARSED_GRAPH: &str = "parsed-graph.json";
pub const ENHANCED_GRAPH: &str = "enhanced-graph.json";
pub const LAYOUT_GRAPH: &str = "layout-graph.json";
pub const DIAGRAM: &str = "diagram.excalidraw";

/// Artifact written by a step
pub fn artifact_name(step: StepName) -> &'static str {
    match step {
        StepName::Parse => PARSED_GRAPH,
        StepName::Enhance => ENHANCED_GRAPH,
        StepName::Layout => LAYOUT_GRAPH,
        StepName::Generate => DIAGRAM,
    }
}

/// Step descriptor
///
/// `depends_on[0]` is the primary input. When an optional dependency is
/// skipped, its own primary input stands in for it.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub name: StepName,
    pub label: &'static str,
    pub depends_on: Vec<StepName>,
    pub optional: bool,
}

impl StepDescriptor {
    pub fn new(
        name: StepName,
        label: &'static str,
        depends_on: Vec<StepName>,
        optional: bool,
    ) -> Self {
        Self {
            name,
            label,
            depends_on,
            optional,
        }
    }
}

/// Ordered step list
///
/// Linear: every dependency must be declared before the step using it.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    steps: Vec<StepDescriptor>,
}

impl PipelinePlan {
    pub fn new(steps: Vec<StepDescriptor>) -> Result<Self> {
        let mut declared = HashSet::new();
        for step in &steps {
            for dep in &step.depends_on {
                if !declared.contains(dep) {
                    return Err(OrchestratorError::MissingDependency(format!(
                        "Step {} depends on {} which is not declared before it",
                        step.name, dep
                    )));
                }
            }
            if !declared.insert(step.name) {
                return Err(OrchestratorError::configuration(format!(
                    "Step {} declared twice",
                    step.name
                )));
            }
        }
        Ok(Self { steps })
    }

    /// parse → enhance? → layout → generate
    pub fn default_pipeline() -> Result<Self> {
        Self::new(vec![
            StepDescriptor::new(StepName::Parse, "Parse IaC sources", vec![], false),
            StepDescriptor::new(
                StepName::Enhance,
                "LLM enhancement",
                vec![StepName::Parse],
                true, // Optional
            ),
            StepDescriptor::new(
                StepName::Layout,
                "Graph layout",
                vec![StepName::Enhance],
                false,
            ),
            StepDescriptor::new(
                StepName::Generate,
                "Diagram generation",
                vec![StepName::Layout, StepName::Enhance],
                false,
            ),
        ])
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    pub fn get(&self, name: StepName) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps needed to produce `target`, in plan order (target included)
    pub fn chain_to(&self, target: StepName) -> Result<Vec<&StepDescriptor>> {
        let target_desc = self
            .get(target)
            .ok_or_else(|| OrchestratorError::configuration(format!("Unknown step {}", target)))?;

        let mut needed = HashSet::new();
        let mut stack = vec![target_desc];
        while let Some(desc) = stack.pop() {
            if !needed.insert(desc.name) {
                continue;
            }
            for dep in &desc.depends_on {
                if let Some(dep_desc) = self.get(*dep) {
                    stack.push(dep_desc);
                }
            }
        }

        Ok(self
            .steps
            .iter()
            .filter(|s| needed.contains(&s.name))
            .collect())
    }

    /// Step whose artifact satisfies `dependency`, looking through skipped optional steps
    pub fn resolve_input(
        &self,
        dependency: StepName,
        is_skipped: impl Fn(StepName) -> bool,
    ) -> Result<StepName> {
        let mut current = dependency;
        loop {
            if !is_skipped(current) {
                return Ok(current);
            }
            let desc = self.get(current).ok_or_else(|| {
                OrchestratorError::configuration(format!("Unknown step {}", current))
            })?;
            if !desc.optional {
                return Err(OrchestratorError::configuration(format!(
                    "Step {} is not optional and cannot be skipped",
                    current
                )));
            }
            current = *desc.depends_on.first().ok_or_else(|| {
                OrchestratorError::MissingDependency(format!(
                    "Skipped step {} has no input to pass through",
                    current
                ))
            })?;
        }
    }

    /// Execution plan as string (for logging)
    pub fn execution_plan(&self, target: StepName) -> String {
        match self.chain_to(target) {
            Ok(chain) => chain
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    format!(
                        "Step {}: {} ({}){}",
                        i + 1,
                        s.name,
                        s.label,
                        if s.optional { " [optional]" } else { "" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("<invalid plan: {}>", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(chain: Vec<&StepDescriptor>) -> Vec<StepName> {
        chain.into_iter().map(|s| s.name).collect()
    }

    #[test]
    fn test_artifact_names() {
        assert_eq!(artifact_name(StepName::Parse), "parsed-graph.json");
        assert_eq!(artifact_name(StepName::Generate), "diagram.excalidraw");
    }

    #[test]
    fn test_default_pipeline_order() {
        let plan = PipelinePlan::default_pipeline().unwrap();
        let order: Vec<_> = plan.steps().iter().map(|s| s.name).collect();
        assert_eq!(order, StepName::ALL.to_vec());
    }

    #[test]
    fn test_chain_to_layout() {
        let plan = PipelinePlan::default_pipeline().unwrap();
        assert_eq!(
            names(plan.chain_to(StepName::Layout).unwrap()),
            vec![StepName::Parse, StepName::Enhance, StepName::Layout]
        );
        assert_eq!(
            names(plan.chain_to(StepName::Parse).unwrap()),
            vec![StepName::Parse]
        );
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let result = PipelinePlan::new(vec![
            StepDescriptor::new(StepName::Layout, "Layout", vec![StepName::Parse], false),
            StepDescriptor::new(StepName::Parse, "Parse", vec![], false),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let result = PipelinePlan::new(vec![
            StepDescriptor::new(StepName::Parse, "Parse", vec![], false),
            StepDescriptor::new(StepName::Parse, "Parse again", vec![], false),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_input_passes_through_skipped_enhance() {
        let plan = PipelinePlan::default_pipeline().unwrap();

        let resolved = plan
            .resolve_input(StepName::Enhance, |s| s == StepName::Enhance)
            .unwrap();
        assert_eq!(resolved, StepName::Parse);

        let resolved = plan.resolve_input(StepName::Enhance, |_| false).unwrap();
        assert_eq!(resolved, StepName::Enhance);
    }

    #[test]
    fn test_resolve_input_refuses_required_step() {
        let plan = PipelinePlan::default_pipeline().unwrap();
        assert!(plan
            .resolve_input(StepName::Layout, |s| s == StepName::Layout)
            .is_err());
    }

    #[test]
    fn test_execution_plan_string() {
        let plan = PipelinePlan::default_pipeline().unwrap();
        let text = plan.execution_plan(StepName::Generate);

        assert!(text.contains("Step 1: parse"));
        assert!(text.contains("enhance (LLM enhancement) [optional]"));
        assert!(text.contains("Step 4: generate"));
    }
}
