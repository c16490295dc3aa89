use crate::error::{OrchestratorError, Result};
use chrono::Utc;
use infragram_storage::{
    Run, RunStatus, SkippedStep, StepMetrics, StepName, StepResult, StepStatus,
};

/// Run state machine
///
/// Run: `pending -> running -> (completed | failed)`.
/// Step result: `pending -> running -> (completed | failed)`, once per step.
pub struct RunStateMachine {
    run: Run,
}

impl RunStateMachine {
    pub fn new(run: Run) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn into_run(self) -> Run {
        self.run
    }

    fn invalid(from: impl Into<String>, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: from.into(),
            to: to.to_string(),
        }
    }

    /// Record a pending result for `step`
    ///
    /// The first step moves the run from `pending` to `running`.
    pub fn begin_step(&mut self, step: StepName) -> Result<()> {
        if self.run.status.is_terminal() {
            return Err(Self::invalid(self.run.status.as_str(), "running"));
        }
        if self.run.step(step).is_some() || self.run.is_skipped(step) {
            return Err(Self::invalid(
                format!("{} (already recorded)", step),
                "pending",
            ));
        }
        if self.run.status == RunStatus::Pending {
            self.run.status = RunStatus::Running;
            self.run.started_at = Utc::now();
        }
        self.run.steps.push(StepResult::pending(step));
        Ok(())
    }

    fn current_mut(&mut self, expected: StepStatus, to: &str) -> Result<&mut StepResult> {
        match self.run.steps.last_mut() {
            Some(result) if result.status == expected => Ok(result),
            Some(result) => Err(Self::invalid(
                format!("{}:{}", result.step, result.status),
                to,
            )),
            None => Err(Self::invalid("no step", to)),
        }
    }

    /// Transition: PENDING → RUNNING (current step)
    pub fn start_step(&mut self) -> Result<()> {
        let result = self.current_mut(StepStatus::Pending, "running")?;
        result.status = StepStatus::Running;
        Ok(())
    }

    /// Transition: RUNNING → COMPLETED (current step)
    pub fn complete_step(
        &mut self,
        output_file: impl Into<String>,
        duration_ms: u64,
        metrics: StepMetrics,
    ) -> Result<()> {
        let result = self.current_mut(StepStatus::Running, "completed")?;
        result.status = StepStatus::Completed;
        result.output_file = Some(output_file.into());
        result.duration = Some(duration_ms);
        result.metrics = Some(metrics);
        Ok(())
    }

    /// Transition: PENDING | RUNNING → FAILED (current step)
    pub fn fail_step(&mut self, error: impl Into<String>, duration_ms: u64) -> Result<()> {
        let result = match self.run.steps.last_mut() {
            Some(r) if matches!(r.status, StepStatus::Pending | StepStatus::Running) => r,
            Some(r) => return Err(Self::invalid(format!("{}:{}", r.step, r.status), "failed")),
            None => return Err(Self::invalid("no step", "failed")),
        };
        result.status = StepStatus::Failed;
        result.error = Some(error.into());
        result.duration = Some(duration_ms);
        Ok(())
    }

    /// Record an optional step as skipped (never appears in `steps`)
    pub fn skip_step(&mut self, step: StepName, reason: impl Into<String>) -> Result<()> {
        if self.run.step(step).is_some() || self.run.is_skipped(step) {
            return Err(Self::invalid(format!("{} (already recorded)", step), "skipped"));
        }
        self.run.skipped.push(SkippedStep {
            step,
            reason: reason.into(),
        });
        Ok(())
    }

    pub fn last_result(&self) -> Option<&StepResult> {
        self.run.steps.last()
    }

    /// Transition: RUNNING → COMPLETED | FAILED
    ///
    /// `completed` iff every recorded step completed; a run that never
    /// started a step cannot finish.
    pub fn finish(&mut self) -> Result<RunStatus> {
        if self.run.status != RunStatus::Running {
            return Err(Self::invalid(self.run.status.as_str(), "finished"));
        }
        if let Some(open) = self
            .run
            .steps
            .iter()
            .find(|r| matches!(r.status, StepStatus::Pending | StepStatus::Running))
        {
            return Err(Self::invalid(
                format!("{}:{}", open.step, open.status),
                "finished",
            ));
        }

        let status = if self.run.steps.iter().all(|r| r.is_completed()) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.run.status = status;
        self.run.completed_at = Some(Utc::now());
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> RunStateMachine {
        RunStateMachine::new(Run::new("r1", "shop"))
    }

    #[test]
    fn test_first_step_moves_run_to_running() {
        let mut sm = machine();
        assert_eq!(sm.run().status, RunStatus::Pending);

        sm.begin_step(StepName::Parse).unwrap();
        assert_eq!(sm.run().status, RunStatus::Running);
        assert_eq!(sm.run().steps[0].status, StepStatus::Pending);
    }

    #[test]
    fn test_step_completed_lifecycle() {
        let mut sm = machine();
        sm.begin_step(StepName::Parse).unwrap();
        sm.start_step().unwrap();
        sm.complete_step("parsed-graph.json", 5, StepMetrics::default())
            .unwrap();

        let result = &sm.run().steps[0];
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output_file.as_deref(), Some("parsed-graph.json"));
        assert_eq!(result.duration, Some(5));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_cannot_complete_pending_step() {
        let mut sm = machine();
        sm.begin_step(StepName::Parse).unwrap();
        assert!(sm.complete_step("x", 0, StepMetrics::default()).is_err());
    }

    #[test]
    fn test_step_cannot_be_reentered() {
        let mut sm = machine();
        sm.begin_step(StepName::Parse).unwrap();
        sm.start_step().unwrap();
        sm.fail_step("boom", 1).unwrap();

        assert!(sm.begin_step(StepName::Parse).is_err());
        assert!(sm.fail_step("again", 1).is_err());
    }

    #[test]
    fn test_skipped_step_is_not_in_steps() {
        let mut sm = machine();
        sm.skip_step(StepName::Enhance, "no credential").unwrap();

        assert!(sm.run().steps.is_empty());
        assert!(sm.run().is_skipped(StepName::Enhance));
        assert!(sm.begin_step(StepName::Enhance).is_err());
    }

    #[test]
    fn test_finish_completed_when_all_completed() {
        let mut sm = machine();
        for step in [StepName::Parse, StepName::Layout] {
            sm.begin_step(step).unwrap();
            sm.start_step().unwrap();
            sm.complete_step("out", 1, StepMetrics::default()).unwrap();
        }

        assert_eq!(sm.finish().unwrap(), RunStatus::Completed);
        assert!(sm.run().completed_at.is_some());
    }

    #[test]
    fn test_finish_failed_when_any_failed() {
        let mut sm = machine();
        sm.begin_step(StepName::Parse).unwrap();
        sm.start_step().unwrap();
        sm.fail_step("invalid syntax", 3).unwrap();

        assert_eq!(sm.finish().unwrap(), RunStatus::Failed);
        assert_eq!(sm.run().steps[0].error.as_deref(), Some("invalid syntax"));
    }

    #[test]
    fn test_cannot_finish_pending_run() {
        let mut sm = machine();
        assert!(sm.finish().is_err());
    }

    #[test]
    fn test_cannot_finish_with_open_step() {
        let mut sm = machine();
        sm.begin_step(StepName::Parse).unwrap();
        sm.start_step().unwrap();
        assert!(sm.finish().is_err());
    }
}
