//! Plan runner: drives a whole plan through the step executor.
//!
//! The runner owns run-level policy: declared step order, stop-on-failure,
//! cooperative stop requests, resume-from-failure, and fatal-error abort.
//! Step-level policy (retries, backoff, evidence capture) stays in the
//! executor.
//!
//! A stop request is sampled at step boundaries only; the in-flight step
//! always runs to its own completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::evidence::EvidenceStore;
use crate::executor::{RunOptions, StepExecutor};
use crate::locator::TargetLocator;
use crate::plan::TestPlan;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::report::{
    ExecutionReport, ExecutionState, RunStatus, StepResult, StepStatus,
};
use crate::verifier::VisualVerifier;

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors from run orchestration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The requested step id is not in the plan
    UnknownStep(u32),

    /// Resume was requested but no step has failed
    NoFailedStep,
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::UnknownStep(id) => write!(f, "Step {} is not in the plan", id),
            RunnerError::NoFailedStep => write!(f, "No failed step to resume from"),
        }
    }
}

impl std::error::Error for RunnerError {}

/// Terminal outcome of a run: final state plus the derived report.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: ExecutionState,
    pub report: ExecutionReport,
}

/// Generate a fresh run identifier.
pub fn new_run_id(plan_id: &str) -> String {
    format!("{}-{}", plan_id, Utc::now().format("%Y%m%d-%H%M%S%.3f"))
}

/// Executes a plan's steps in declared order against one browser session.
pub struct PlanRunner<'a> {
    plan: &'a TestPlan,
    browser: &'a mut dyn BrowserSession,
    locator: &'a dyn TargetLocator,
    verifier: &'a dyn VisualVerifier,
    sink: &'a dyn ProgressSink,
    evidence: Option<&'a EvidenceStore>,
    stop: Arc<AtomicBool>,
    run_id: Option<String>,
}

impl<'a> PlanRunner<'a> {
    pub fn new(
        plan: &'a TestPlan,
        browser: &'a mut dyn BrowserSession,
        locator: &'a dyn TargetLocator,
        verifier: &'a dyn VisualVerifier,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            plan,
            browser,
            locator,
            verifier,
            sink,
            evidence: None,
            stop: Arc::new(AtomicBool::new(false)),
            run_id: None,
        }
    }

    /// Persist screenshots and the final report into the given store.
    pub fn with_evidence(mut self, store: &'a EvidenceStore) -> Self {
        self.evidence = Some(store);
        self
    }

    /// Share a stop flag with the caller. Setting it requests a cooperative
    /// stop at the next step boundary.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Use a caller-chosen run identifier instead of generating one.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Run the whole plan (or from `options.start_from_step` onward).
    pub fn run_all(&mut self, options: &RunOptions) -> RunnerResult<RunSummary> {
        let start_pos = match options.start_from_step {
            Some(id) => self
                .plan
                .position_of(id)
                .ok_or(RunnerError::UnknownStep(id))?,
            None => 0,
        };
        let run_id = self
            .run_id
            .clone()
            .unwrap_or_else(|| new_run_id(&self.plan.plan_id));
        let state = ExecutionState::new(run_id, self.plan.steps.iter().map(|s| s.step_id));
        Ok(self.run_from(start_pos, state, options))
    }

    /// Re-run from the first failed step of a prior run, in declared order.
    /// Earlier passed steps keep their recorded results.
    pub fn resume(
        &mut self,
        prior: &ExecutionState,
        options: &RunOptions,
    ) -> RunnerResult<RunSummary> {
        let resume_pos = self
            .plan
            .steps
            .iter()
            .position(|s| prior.step_statuses.get(&s.step_id) == Some(&StepStatus::Fail))
            .ok_or(RunnerError::NoFailedStep)?;

        let run_id = self
            .run_id
            .clone()
            .unwrap_or_else(|| new_run_id(&self.plan.plan_id));
        let mut state = ExecutionState::new(run_id, self.plan.steps.iter().map(|s| s.step_id));

        // Carry forward results for steps ahead of the resume point.
        for step in &self.plan.steps[..resume_pos] {
            if let Some(result) = prior.latest_result(step.step_id) {
                state.record(result.clone());
            }
        }

        Ok(self.run_from(resume_pos, state, options))
    }

    /// Execute one step in isolation, recording its result into `state`
    /// without touching any sibling step.
    pub fn run_single_step(
        &mut self,
        step_id: u32,
        options: &RunOptions,
        state: &mut ExecutionState,
    ) -> RunnerResult<StepResult> {
        let pos = self
            .plan
            .position_of(step_id)
            .ok_or(RunnerError::UnknownStep(step_id))?;

        state.current_step = Some(step_id);
        self.emit_step(state, step_id, StepStatus::Running, None, None);

        let result = self.execute_step_at(pos, options);

        self.emit_step(
            state,
            step_id,
            result.status,
            result.error_message.clone(),
            screenshot_of(&result),
        );
        state.current_step = None;
        state.record(result.clone());
        Ok(result)
    }

    fn execute_step_at(&mut self, pos: usize, options: &RunOptions) -> StepResult {
        let step = &self.plan.steps[pos];
        let mut executor =
            StepExecutor::new(self.browser, self.locator, self.verifier, options);
        if let Some(store) = self.evidence {
            executor = executor.with_evidence(store);
        }
        executor.execute(step)
    }

    fn run_from(
        &mut self,
        start_pos: usize,
        mut state: ExecutionState,
        options: &RunOptions,
    ) -> RunSummary {
        let started = Instant::now();
        state.status = RunStatus::Running;
        info!(
            run_id = %state.run_id,
            plan_id = %self.plan.plan_id,
            total_steps = self.plan.steps.len(),
            start_pos,
            "run_started"
        );
        self.sink.emit(ProgressEvent::RunStarted {
            run_id: state.run_id.clone(),
            plan_id: self.plan.plan_id.clone(),
            total_steps: self.plan.steps.len(),
        });

        let mut run_status = RunStatus::Completed;
        let mut message: Option<String> = None;

        for pos in start_pos..self.plan.steps.len() {
            let step_id = self.plan.steps[pos].step_id;

            if self.stop.load(Ordering::SeqCst) {
                info!(run_id = %state.run_id, step_id, "run_stop_requested");
                run_status = RunStatus::Stopped;
                message = Some(format!("stopped by request before step {}", step_id));
                self.skip_rest(&mut state, pos, "stopped by request");
                break;
            }

            state.current_step = Some(step_id);
            self.emit_step(&state, step_id, StepStatus::Running, None, None);

            let result = self.execute_step_at(pos, options);
            let failed = result.status == StepStatus::Fail;
            let fatal = result.error.map(|e| e.is_fatal()).unwrap_or(false);

            self.emit_step(
                &state,
                step_id,
                result.status,
                result.error_message.clone(),
                screenshot_of(&result),
            );
            state.record(result);

            if fatal {
                warn!(run_id = %state.run_id, step_id, "run_aborted_fatal");
                run_status = RunStatus::Error;
                message = Some(format!("aborted at step {}: browser session closed", step_id));
                self.skip_rest(&mut state, pos + 1, "session closed");
                break;
            }
            if failed && options.stop_on_failure {
                info!(run_id = %state.run_id, step_id, "run_stopped_on_failure");
                message = Some(format!("stopped after failure at step {}", step_id));
                self.skip_rest(&mut state, pos + 1, "stop on failure");
                break;
            }
        }

        state.current_step = None;
        state.status = run_status;

        let total_ms = started.elapsed().as_millis() as u64;
        let report =
            ExecutionReport::from_state(&self.plan.plan_id, &state, run_status, total_ms, message);
        info!(
            run_id = %state.run_id,
            overall = ?report.overall_status,
            passed = report.passed_steps,
            failed = report.failed_steps,
            skipped = report.skipped_steps,
            "run_finished"
        );

        if let Some(store) = self.evidence {
            if let Err(e) = store.save_report(&report) {
                warn!(run_id = %state.run_id, error = %e, "report_write_failed");
            }
        }

        self.sink.emit(ProgressEvent::RunFinished {
            run_id: state.run_id.clone(),
            report: report.clone(),
        });

        RunSummary { state, report }
    }

    /// Mark every not-yet-run step from `from_pos` onward as skipped.
    fn skip_rest(&mut self, state: &mut ExecutionState, from_pos: usize, reason: &str) {
        for step in &self.plan.steps[from_pos..] {
            let result =
                StepResult::skipped(step.step_id, step.action.kind().as_str(), reason);
            self.emit_step(
                state,
                step.step_id,
                StepStatus::Skipped,
                Some(reason.to_string()),
                None,
            );
            state.record(result);
        }
    }

    fn emit_step(
        &self,
        state: &ExecutionState,
        step_id: u32,
        status: StepStatus,
        message: Option<String>,
        screenshot: Option<String>,
    ) {
        self.sink.emit(ProgressEvent::StepUpdate {
            run_id: state.run_id.clone(),
            step_id,
            status,
            message,
            screenshot,
        });
    }
}

fn screenshot_of(result: &StepResult) -> Option<String> {
    let evidence = result.evidence.as_ref()?;
    let path = evidence
        .failure_screenshot
        .as_ref()
        .or(evidence.screenshot_after.as_ref())?;
    Some(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockBrowser, ScriptedFailure};
    use crate::locator::{LocateScript, ScriptedLocator};
    use crate::progress::NullSink;
    use crate::report::Verdict;
    use crate::verifier::{ScriptedVerifier, VerifyScript};
    use pretty_assertions::assert_eq;

    fn three_step_plan() -> TestPlan {
        let json = r#"{
            "plan_id": "tc-login",
            "description": "login flow",
            "steps": [
                {"step_id": 1, "action": "navigate", "target": "https://example.com/login",
                 "expected_visual": "The login form is visible"},
                {"step_id": 2, "action": "input", "target_description": "the email field",
                 "value": "user@example.com", "expected_visual": "The email is filled in"},
                {"step_id": 3, "action": "click", "target_description": "the Sign in button",
                 "expected_visual": "The dashboard is visible"}
            ]
        }"#;
        TestPlan::from_json(json).unwrap()
    }

    #[test]
    fn test_run_all_passes() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();

        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_all(&options)
            .unwrap();

        assert_eq!(summary.report.overall_status, Verdict::Pass);
        assert_eq!(summary.report.passed_steps, 3);
        assert_eq!(summary.state.status, RunStatus::Completed);
        assert_eq!(summary.state.current_step, None);
    }

    #[test]
    fn test_stop_on_failure_skips_tail() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        // Step 2's locate never finds the email field.
        let locator = ScriptedLocator::always(LocateScript::NotFound);
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();

        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_all(&options)
            .unwrap();

        assert_eq!(summary.report.overall_status, Verdict::Fail);
        assert_eq!(summary.report.passed_steps, 1);
        assert_eq!(summary.report.failed_steps, 1);
        assert_eq!(summary.report.skipped_steps, 1);
        assert_eq!(summary.state.step_statuses[&3], StepStatus::Skipped);
        assert_eq!(summary.state.status, RunStatus::Completed);
    }

    #[test]
    fn test_continue_on_failure_runs_every_step() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50))
            .then(LocateScript::NotFound)
            .then(LocateScript::NotFound);
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let mut options = RunOptions::immediate();
        options.stop_on_failure = false;

        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_all(&options)
            .unwrap();

        // Step 2 failed on locate; steps 1 and 3 still ran.
        assert_eq!(summary.report.failed_steps, 1);
        assert_eq!(summary.report.passed_steps, 2);
        assert_eq!(summary.report.skipped_steps, 0);
        assert_eq!(summary.state.step_statuses[&2], StepStatus::Fail);
    }

    #[test]
    fn test_fatal_error_aborts_run() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        browser.script_failure(ScriptedFailure::SessionClosed);
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();

        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_all(&options)
            .unwrap();

        assert_eq!(summary.state.status, RunStatus::Error);
        assert_eq!(summary.report.failed_steps, 1);
        assert_eq!(summary.report.skipped_steps, 2);
        assert!(summary.report.message.unwrap().contains("session closed"));
    }

    #[test]
    fn test_stop_flag_sampled_at_boundaries() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();
        let stop = Arc::new(AtomicBool::new(true));

        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .with_stop_flag(stop)
            .run_all(&options)
            .unwrap();

        assert_eq!(summary.state.status, RunStatus::Stopped);
        assert_eq!(summary.report.skipped_steps, 3);
        assert_eq!(summary.report.passed_steps, 0);
        assert_eq!(browser.action_count(), 0);
    }

    #[test]
    fn test_run_single_step_leaves_siblings_alone() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();
        let mut state =
            ExecutionState::new("run-x", plan.steps.iter().map(|s| s.step_id));

        let result = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_single_step(2, &options, &mut state)
            .unwrap();

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(state.step_statuses[&2], StepStatus::Pass);
        assert_eq!(state.step_statuses[&1], StepStatus::Pending);
        assert_eq!(state.step_statuses[&3], StepStatus::Pending);
    }

    #[test]
    fn test_run_single_step_unknown_id() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();
        let mut state = ExecutionState::new("run-x", [1, 2, 3]);

        let err = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_single_step(99, &options, &mut state)
            .unwrap_err();
        assert_eq!(err, RunnerError::UnknownStep(99));
    }

    #[test]
    fn test_resume_reruns_from_first_failure() {
        let plan = three_step_plan();
        let sink = NullSink;
        let options = RunOptions::immediate();

        // First run: step 2 fails, step 3 skipped.
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::NotFound);
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let first = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_all(&options)
            .unwrap();
        assert_eq!(first.state.first_failed_step(), Some(2));

        // Resume: locator now finds everything.
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .resume(&first.state, &options)
            .unwrap();

        assert_eq!(summary.report.overall_status, Verdict::Pass);
        assert_eq!(summary.report.passed_steps, 3);
        // Step 1 was not re-executed; its prior result was carried forward.
        assert!(!browser
            .action_log()
            .iter()
            .any(|a| a.starts_with("navigate")));
    }

    #[test]
    fn test_resume_without_failure_is_rejected() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let options = RunOptions::immediate();

        let prior = ExecutionState::new("run-x", [1, 2, 3]);
        let err = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .resume(&prior, &options)
            .unwrap_err();
        assert_eq!(err, RunnerError::NoFailedStep);
    }

    #[test]
    fn test_start_from_step_skips_earlier_steps() {
        let plan = three_step_plan();
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(50, 50));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let sink = NullSink;
        let mut options = RunOptions::immediate();
        options.start_from_step = Some(3);

        let summary = PlanRunner::new(&plan, &mut browser, &locator, &verifier, &sink)
            .run_all(&options)
            .unwrap();

        assert_eq!(summary.report.passed_steps, 1);
        assert_eq!(summary.state.step_statuses[&1], StepStatus::Pending);
        assert_eq!(summary.state.step_statuses[&2], StepStatus::Pending);
        assert_eq!(summary.state.step_statuses[&3], StepStatus::Pass);
    }
}
