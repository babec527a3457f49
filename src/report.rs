//! Types for step results, run state, and the final execution report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Pass,
    Fail,
    Skipped,
}

impl StepStatus {
    /// Whether this status is final for the step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Pass | StepStatus::Fail | StepStatus::Skipped)
    }
}

/// Classified failure cause for a step.
///
/// `TargetNotFound` and `VisualMismatch` are expected negative outcomes, not
/// infrastructure faults; they are recorded exactly like a pass. Only
/// `SessionClosed` is fatal to the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The locator exhausted its retries without finding the target
    TargetNotFound,
    /// The verifier judged the expected visual unmet
    VisualMismatch,
    /// The locator endpoint kept failing (transport/model fault)
    LocatorUnavailable,
    /// The verifier endpoint kept failing (transport/model fault)
    VerifierUnavailable,
    /// A browser action kept failing after transient retries
    ActionFailed,
    /// The browser session is no longer usable; aborts the run
    SessionClosed,
}

impl StepErrorKind {
    /// Fatal errors abort the run; everything else is confined to the step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepErrorKind::SessionClosed)
    }
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepErrorKind::TargetNotFound => "target_not_found",
            StepErrorKind::VisualMismatch => "visual_mismatch",
            StepErrorKind::LocatorUnavailable => "locator_unavailable",
            StepErrorKind::VerifierUnavailable => "verifier_unavailable",
            StepErrorKind::ActionFailed => "action_failed",
            StepErrorKind::SessionClosed => "session_closed",
        };
        f.write_str(s)
    }
}

/// Evidence collected while executing one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepEvidence {
    /// Screenshot captured before the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_before: Option<PathBuf>,

    /// Screenshot captured after the action (always attempted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<PathBuf>,

    /// Screenshot captured at the failing attempt, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_screenshot: Option<PathBuf>,

    /// Verifier confidence in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Verifier explanation of the judgement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    /// How the locator identified the target element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_description: Option<String>,
}

/// Immutable record of one step execution attempt.
///
/// Produced exactly once per `execute_step` invocation, pass or fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step identifier
    pub step_id: u32,

    /// Terminal status (pass | fail | skipped)
    pub status: StepStatus,

    /// Action kind that was executed (wire string)
    pub action: String,

    /// When the result was produced
    pub timestamp: DateTime<Utc>,

    /// Wall-clock execution duration in milliseconds
    pub duration_ms: u64,

    /// Retry attempts actually consumed across all phases
    pub retry_count: u32,

    /// Classified failure cause, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorKind>,

    /// Human-readable error message, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Captured evidence, when the step got far enough to produce any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<StepEvidence>,
}

impl StepResult {
    /// A skipped-step result (no execution attempted).
    pub fn skipped(step_id: u32, action: &str, reason: &str) -> Self {
        Self {
            step_id,
            status: StepStatus::Skipped,
            action: action.to_string(),
            timestamp: Utc::now(),
            duration_ms: 0,
            retry_count: 0,
            error: None,
            error_message: Some(reason.to_string()),
            evidence: None,
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Stopped,
    Completed,
    Error,
}

impl RunStatus {
    /// Whether a new run may be started from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Completed | RunStatus::Error)
    }
}

/// Mutable state of the current (or most recent) run.
///
/// Owned and mutated exclusively by the plan runner; observers see snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Run identifier
    pub run_id: String,

    /// Overall run status
    pub status: RunStatus,

    /// Step currently being processed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,

    /// Latest status per step id
    pub step_statuses: BTreeMap<u32, StepStatus>,

    /// Step results accumulated so far, in execution order
    pub results: Vec<StepResult>,
}

impl ExecutionState {
    /// Fresh state for a new run over the given step ids.
    pub fn new(run_id: impl Into<String>, step_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Idle,
            current_step: None,
            step_statuses: step_ids.into_iter().map(|id| (id, StepStatus::Pending)).collect(),
            results: Vec::new(),
        }
    }

    /// Record a produced result, updating the per-step status map.
    pub fn record(&mut self, result: StepResult) {
        self.step_statuses.insert(result.step_id, result.status);
        self.results.push(result);
    }

    /// Latest result recorded for a step, if any.
    pub fn latest_result(&self, step_id: u32) -> Option<&StepResult> {
        self.results.iter().rev().find(|r| r.step_id == step_id)
    }

    /// First step id whose latest status is `Fail`, in ascending id order.
    /// The runner resolves declared order against the plan itself.
    pub fn first_failed_step(&self) -> Option<u32> {
        self.step_statuses
            .iter()
            .find(|(_, s)| **s == StepStatus::Fail)
            .map(|(id, _)| *id)
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Final report for a terminated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Run identifier
    pub run_id: String,

    /// Plan identifier
    pub plan_id: String,

    /// `pass` only when every executed step passed and none failed or skipped
    pub overall_status: Verdict,

    /// Terminal run status (completed | stopped | error)
    pub run_status: RunStatus,

    /// Count of passed steps
    pub passed_steps: usize,

    /// Count of failed steps
    pub failed_steps: usize,

    /// Count of skipped steps
    pub skipped_steps: usize,

    /// Total wall-clock duration in milliseconds
    pub total_duration_ms: u64,

    /// Step results in execution order
    pub results: Vec<StepResult>,

    /// Explanatory message for stopped or errored runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionReport {
    /// Build a report from accumulated state.
    pub fn from_state(
        plan_id: &str,
        state: &ExecutionState,
        run_status: RunStatus,
        total_duration_ms: u64,
        message: Option<String>,
    ) -> Self {
        let passed = state.results.iter().filter(|r| r.status == StepStatus::Pass).count();
        let failed = state.results.iter().filter(|r| r.status == StepStatus::Fail).count();
        let skipped = state.results.iter().filter(|r| r.status == StepStatus::Skipped).count();

        let overall = if failed == 0 && skipped == 0 && run_status == RunStatus::Completed {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        Self {
            run_id: state.run_id.clone(),
            plan_id: plan_id.to_string(),
            overall_status: overall,
            run_status,
            passed_steps: passed,
            failed_steps: failed,
            skipped_steps: skipped,
            total_duration_ms,
            results: state.results.clone(),
            message,
        }
    }

    /// Render the report as a human-readable Markdown document.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Test Report - {}\n\n", self.run_id));
        out.push_str(&format!("Plan: {}\n\n", self.plan_id));
        out.push_str(&format!(
            "**Overall**: {:?} ({} passed, {} failed, {} skipped) in {} ms\n\n",
            self.overall_status,
            self.passed_steps,
            self.failed_steps,
            self.skipped_steps,
            self.total_duration_ms
        ));
        if let Some(msg) = &self.message {
            out.push_str(&format!("> {}\n\n", msg));
        }
        out.push_str("## Steps\n\n");
        for result in &self.results {
            out.push_str(&format!("### Step {}\n", result.step_id));
            out.push_str(&format!("**Action**: `{}`\n", result.action));
            out.push_str(&format!("**Status**: {:?}\n", result.status));
            out.push_str(&format!(
                "**Duration**: {} ms (retries: {})\n",
                result.duration_ms, result.retry_count
            ));
            if let Some(err) = &result.error {
                out.push_str(&format!("**Error**: {}\n", err));
            }
            if let Some(msg) = &result.error_message {
                out.push_str(&format!("**Detail**: {}\n", msg));
            }
            if let Some(evidence) = &result.evidence {
                if let Some(conf) = evidence.confidence {
                    out.push_str(&format!("**Confidence**: {:.2}\n", conf));
                }
                if let Some(expl) = &evidence.explanation {
                    out.push_str(&format!("**Explanation**: {}\n", expl));
                }
                if let Some(path) = &evidence.screenshot_after {
                    out.push_str(&format!("**Screenshot**: {}\n", path.display()));
                }
            }
            out.push_str("\n---\n\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed(step_id: u32) -> StepResult {
        StepResult {
            step_id,
            status: StepStatus::Pass,
            action: "click".to_string(),
            timestamp: Utc::now(),
            duration_ms: 10,
            retry_count: 0,
            error: None,
            error_message: None,
            evidence: None,
        }
    }

    #[test]
    fn test_report_counts_and_verdict() {
        let mut state = ExecutionState::new("run-1", [1, 2, 3]);
        state.record(passed(1));
        state.record(passed(2));
        state.record(passed(3));

        let report = ExecutionReport::from_state("tc-1", &state, RunStatus::Completed, 42, None);
        assert_eq!(report.overall_status, Verdict::Pass);
        assert_eq!(report.passed_steps, 3);
        assert_eq!(report.failed_steps, 0);
        assert_eq!(report.skipped_steps, 0);
    }

    #[test]
    fn test_skipped_steps_fail_the_run() {
        let mut state = ExecutionState::new("run-1", [1, 2]);
        state.record(passed(1));
        state.record(StepResult::skipped(2, "click", "stopped"));

        let report = ExecutionReport::from_state("tc-1", &state, RunStatus::Stopped, 42, None);
        assert_eq!(report.overall_status, Verdict::Fail);
        assert_eq!(report.skipped_steps, 1);
    }

    #[test]
    fn test_first_failed_step() {
        let mut state = ExecutionState::new("run-1", [1, 2, 3]);
        state.record(passed(1));
        let mut fail = passed(2);
        fail.status = StepStatus::Fail;
        fail.error = Some(StepErrorKind::VisualMismatch);
        state.record(fail);
        state.record(StepResult::skipped(3, "click", "stop_on_failure"));

        assert_eq!(state.first_failed_step(), Some(2));
    }

    #[test]
    fn test_markdown_render_includes_evidence() {
        let mut result = passed(1);
        result.evidence = Some(StepEvidence {
            confidence: Some(0.93),
            explanation: Some("The dashboard header is visible".to_string()),
            ..Default::default()
        });
        let mut state = ExecutionState::new("run-1", [1]);
        state.record(result);
        let report = ExecutionReport::from_state("tc-1", &state, RunStatus::Completed, 5, None);

        let md = report.render_markdown();
        assert!(md.contains("Step 1"));
        assert!(md.contains("0.93"));
        assert!(md.contains("dashboard header"));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(StepErrorKind::SessionClosed.is_fatal());
        assert!(!StepErrorKind::VisualMismatch.is_fatal());
        assert!(!StepErrorKind::TargetNotFound.is_fatal());
    }
}
