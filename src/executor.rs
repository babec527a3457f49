//! Step executor: drives one step through resolve, act, and verify phases.
//!
//! The executor always produces exactly one `StepResult`, pass or fail.
//! Failures are classified (`StepErrorKind`) rather than propagated; only
//! the caller decides what a fatal kind means for the rest of the run.
//!
//! Retry policy lives here and nowhere else:
//! - locator `NotFound` is retried with a fresh screenshot, up to the
//!   configured per-step ceiling, because the page may still be settling
//! - locator/verifier transport faults and a stale target
//!   (`TargetUnavailable`, which re-runs resolve plus act) get backoff up to
//!   the same per-step ceiling
//! - transient navigation errors retry the action alone with exponential
//!   backoff, capped at a fixed attempt count
//! - a negative verification is terminal and never retried
//! - `SessionClosed` is never retried

use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::browser::{BrowserError, BrowserSession};
use crate::config;
use crate::evidence::{CapturePhase, EvidenceStore};
use crate::locator::{ElementLocation, LocateOutcome, LocatorError, TargetLocator};
use crate::plan::{Action, Step, Target};
use crate::report::{StepErrorKind, StepEvidence, StepResult, StepStatus};
use crate::verifier::{Verification, VerifierError, VisualVerifier};

/// Attempt cap for transient navigation errors (DNS, load timeouts).
const NAVIGATION_ATTEMPTS: u32 = 3;

/// Exponential backoff growth factor between transient attempts.
const BACKOFF_FACTOR: u64 = 2;

/// Options controlling a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Skip remaining steps after the first failure
    pub stop_on_failure: bool,

    /// Per-step attempt ceiling for locator misses, stale targets, and
    /// locator/verifier transport faults
    pub max_retries_per_step: u32,

    /// Base delay between retries (milliseconds); transient faults grow it
    /// exponentially
    pub backoff_ms: u64,

    /// Delay after each browser action before verification (milliseconds)
    pub settle_ms: u64,

    /// Start execution from this step instead of the first
    pub start_from_step: Option<u32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            stop_on_failure: true,
            max_retries_per_step: cfg.run.max_retries,
            backoff_ms: cfg.run.backoff_ms,
            settle_ms: 1000,
            start_from_step: None,
        }
    }
}

impl RunOptions {
    /// Options with all delays zeroed, for tests and mock runs.
    pub fn immediate() -> Self {
        Self {
            stop_on_failure: true,
            max_retries_per_step: config::DEFAULT_MAX_RETRIES,
            backoff_ms: 0,
            settle_ms: 0,
            start_from_step: None,
        }
    }
}

/// Internal failure carried between phases before it becomes a `StepResult`.
struct StepFailure {
    kind: StepErrorKind,
    message: String,
}

impl StepFailure {
    fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Mutable per-execution bookkeeping.
struct Attempt {
    retry_count: u32,
    evidence: StepEvidence,
    verify_attempt: u32,
}

/// Executes a single step against a browser session.
pub struct StepExecutor<'a> {
    browser: &'a mut dyn BrowserSession,
    locator: &'a dyn TargetLocator,
    verifier: &'a dyn VisualVerifier,
    evidence: Option<&'a EvidenceStore>,
    options: &'a RunOptions,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        browser: &'a mut dyn BrowserSession,
        locator: &'a dyn TargetLocator,
        verifier: &'a dyn VisualVerifier,
        options: &'a RunOptions,
    ) -> Self {
        Self { browser, locator, verifier, evidence: None, options }
    }

    /// Persist screenshots into the given store as they are captured.
    pub fn with_evidence(mut self, store: &'a EvidenceStore) -> Self {
        self.evidence = Some(store);
        self
    }

    /// Execute one step to completion. Always returns a result, never panics
    /// or propagates; fatal conditions are reported via the result's error
    /// kind.
    pub fn execute(&mut self, step: &Step) -> StepResult {
        let started = Instant::now();
        info!(
            step_id = step.step_id,
            action = %step.action.kind(),
            intent = %step.intent(),
            "step_execution_started"
        );

        let mut attempt = Attempt {
            retry_count: 0,
            evidence: StepEvidence::default(),
            verify_attempt: 0,
        };
        let outcome = self.run_phases(step, &mut attempt);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(verification) => {
                info!(
                    step_id = step.step_id,
                    confidence = verification.confidence,
                    retries = attempt.retry_count,
                    "step_execution_passed"
                );
                attempt.evidence.confidence = Some(verification.confidence);
                attempt.evidence.explanation = Some(verification.explanation);
                StepResult {
                    step_id: step.step_id,
                    status: StepStatus::Pass,
                    action: step.action.kind().as_str().to_string(),
                    timestamp: Utc::now(),
                    duration_ms,
                    retry_count: attempt.retry_count,
                    error: None,
                    error_message: None,
                    evidence: Some(attempt.evidence),
                }
            }
            Err(failure) => {
                warn!(
                    step_id = step.step_id,
                    error = %failure.kind,
                    retries = attempt.retry_count,
                    detail = %failure.message,
                    "step_execution_failed"
                );
                self.capture_failure_screenshot(step, &mut attempt);
                StepResult {
                    step_id: step.step_id,
                    status: StepStatus::Fail,
                    action: step.action.kind().as_str().to_string(),
                    timestamp: Utc::now(),
                    duration_ms,
                    retry_count: attempt.retry_count,
                    error: Some(failure.kind),
                    error_message: Some(failure.message),
                    evidence: Some(attempt.evidence),
                }
            }
        }
    }

    fn run_phases(
        &mut self,
        step: &Step,
        attempt: &mut Attempt,
    ) -> Result<Verification, StepFailure> {
        self.act(step, attempt)?;

        // Let the page settle before judging it.
        if self.options.settle_ms > 0 {
            let settle = settle_for(&step.action, self.options.settle_ms);
            if !settle.is_zero() {
                thread::sleep(settle);
            }
        }

        self.verify(step, attempt)
    }

    // ------------------------------------------------------------------
    // Acting
    // ------------------------------------------------------------------

    fn act(&mut self, step: &Step, attempt: &mut Attempt) -> Result<(), StepFailure> {
        if matches!(step.action, Action::Verify) {
            return Ok(());
        }

        if let Ok(png) = self.browser.screenshot() {
            self.save_screenshot(step, CapturePhase::Before, 0, &png, attempt);
        }

        let ceiling = self.options.max_retries_per_step.max(1);
        let mut stale = 0u32;
        let mut transient = 0u32;
        loop {
            let result = self.perform(step, attempt)?;
            match result {
                Ok(()) => return Ok(()),
                Err(BrowserError::SessionClosed) => {
                    return Err(StepFailure::new(
                        StepErrorKind::SessionClosed,
                        "browser session closed during action",
                    ));
                }
                Err(e) => {
                    // A stale target re-runs resolve plus act (the next pass
                    // through `perform` takes a fresh screenshot) up to the
                    // per-step ceiling; other transient errors retry the
                    // action alone under the fixed navigation cap.
                    let (failed, cap) = match &e {
                        BrowserError::TargetUnavailable(_) => {
                            stale += 1;
                            (stale, ceiling)
                        }
                        _ => {
                            transient += 1;
                            (transient, NAVIGATION_ATTEMPTS)
                        }
                    };
                    attempt.retry_count += 1;
                    if failed >= cap {
                        return Err(StepFailure::new(
                            StepErrorKind::ActionFailed,
                            format!("action failed after {} attempts: {}", failed, e),
                        ));
                    }
                    warn!(
                        step_id = step.step_id,
                        attempt = failed,
                        error = %e,
                        "step_retry"
                    );
                    self.backoff(failed);
                }
            }
        }
    }

    /// Perform the step's primitive once, resolving coordinates as needed.
    fn perform(
        &mut self,
        step: &Step,
        attempt: &mut Attempt,
    ) -> Result<Result<(), BrowserError>, StepFailure> {
        let result = match &step.action {
            Action::Navigate { url } => self.browser.navigate(url),
            Action::Click { target } => {
                let loc = self.resolve(step, target, attempt)?;
                self.browser.click_at(loc.point)
            }
            Action::Input { target, value } => {
                let loc = self.resolve(step, target, attempt)?;
                match self.browser.click_at(loc.point) {
                    Ok(()) => self.browser.type_text(value),
                    Err(e) => Err(e),
                }
            }
            Action::Scroll { direction } => self.browser.scroll(*direction, 600),
            Action::Wait { seconds } => {
                // A zero settle configuration also disables real waits, so
                // dry runs stay fast.
                if self.options.settle_ms > 0 {
                    thread::sleep(Duration::from_secs(*seconds));
                }
                Ok(())
            }
            Action::Verify => Ok(()),
            Action::KeyCombination { keys } => self.browser.key_combination(keys),
            Action::Drag { source, destination } => {
                let from = self.resolve(step, source, attempt)?;
                let to = self.resolve_description(step, destination, attempt)?;
                self.browser.drag(from.point, to.point)
            }
            Action::Hover { target } => {
                let loc = self.resolve(step, target, attempt)?;
                self.browser.hover_at(loc.point)
            }
            Action::Search { query } => match self.browser.open_search() {
                Ok(()) => match query {
                    Some(q) => self.browser.type_text(q),
                    None => Ok(()),
                },
                Err(e) => Err(e),
            },
            Action::GoBack => self.browser.go_back(),
            Action::GoForward => self.browser.go_forward(),
        };
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Resolving
    // ------------------------------------------------------------------

    fn resolve(
        &mut self,
        step: &Step,
        target: &Target,
        attempt: &mut Attempt,
    ) -> Result<ElementLocation, StepFailure> {
        // Literal element targets go through the locator too; the locator is
        // the only source of coordinates.
        self.resolve_description(step, target.display(), attempt)
    }

    fn resolve_description(
        &mut self,
        step: &Step,
        description: &str,
        attempt: &mut Attempt,
    ) -> Result<ElementLocation, StepFailure> {
        let ceiling = self.options.max_retries_per_step.max(1);
        let mut not_found = 0u32;
        let mut transient = 0u32;

        loop {
            let shot = self.screenshot(step)?;
            match self.locator.locate(description, &shot) {
                Ok(LocateOutcome::Found(loc)) => {
                    attempt.evidence.element_description = Some(format!(
                        "'{}' at ({}, {}), confidence {:.2}",
                        description, loc.point.x, loc.point.y, loc.confidence
                    ));
                    return Ok(loc);
                }
                Ok(LocateOutcome::NotFound { reason }) => {
                    not_found += 1;
                    attempt.retry_count += 1;
                    if not_found >= ceiling {
                        return Err(StepFailure::new(
                            StepErrorKind::TargetNotFound,
                            format!(
                                "'{}' not found after {} attempts: {}",
                                description, not_found, reason
                            ),
                        ));
                    }
                    warn!(
                        step_id = step.step_id,
                        attempt = not_found,
                        target = description,
                        reason = %reason,
                        "step_retry"
                    );
                    // Fresh screenshot on the next pass; flat delay since the
                    // page may still be rendering.
                    self.flat_delay();
                }
                Err(LocatorError::Unavailable(msg)) => {
                    transient += 1;
                    attempt.retry_count += 1;
                    if transient >= ceiling {
                        return Err(StepFailure::new(
                            StepErrorKind::LocatorUnavailable,
                            format!("locator failed after {} attempts: {}", transient, msg),
                        ));
                    }
                    warn!(
                        step_id = step.step_id,
                        attempt = transient,
                        error = %msg,
                        "step_retry"
                    );
                    self.backoff(transient);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Verifying
    // ------------------------------------------------------------------

    fn verify(
        &mut self,
        step: &Step,
        attempt: &mut Attempt,
    ) -> Result<Verification, StepFailure> {
        let ceiling = self.options.max_retries_per_step.max(1);
        let mut transient = 0u32;

        loop {
            let shot = self.screenshot(step)?;
            self.save_screenshot(step, CapturePhase::After, attempt.verify_attempt, &shot, attempt);
            attempt.verify_attempt += 1;

            match self.verifier.verify(&shot, &step.expected_visual) {
                Ok(v) if v.passed => return Ok(v),
                Ok(v) => {
                    // A negative judgement is terminal, uncertain or not.
                    // Only transport faults below get another attempt.
                    attempt.evidence.confidence = Some(v.confidence);
                    attempt.evidence.explanation = Some(v.explanation.clone());
                    let actual = v.actual.unwrap_or_else(|| "unknown".to_string());
                    return Err(StepFailure::new(
                        StepErrorKind::VisualMismatch,
                        format!(
                            "expected '{}' but saw: {} (confidence {:.2})",
                            step.expected_visual, actual, v.confidence
                        ),
                    ));
                }
                Err(VerifierError::Unavailable(msg)) => {
                    transient += 1;
                    attempt.retry_count += 1;
                    if transient >= ceiling {
                        return Err(StepFailure::new(
                            StepErrorKind::VerifierUnavailable,
                            format!("verifier failed after {} attempts: {}", transient, msg),
                        ));
                    }
                    warn!(
                        step_id = step.step_id,
                        attempt = transient,
                        error = %msg,
                        "step_retry"
                    );
                    self.backoff(transient);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Support
    // ------------------------------------------------------------------

    fn screenshot(&mut self, step: &Step) -> Result<Vec<u8>, StepFailure> {
        match self.browser.screenshot() {
            Ok(png) => Ok(png),
            Err(BrowserError::SessionClosed) => Err(StepFailure::new(
                StepErrorKind::SessionClosed,
                "browser session closed during capture",
            )),
            Err(e) => Err(StepFailure::new(
                StepErrorKind::ActionFailed,
                format!("screenshot capture failed for step {}: {}", step.step_id, e),
            )),
        }
    }

    fn save_screenshot(
        &self,
        step: &Step,
        phase: CapturePhase,
        n: u32,
        png: &[u8],
        attempt: &mut Attempt,
    ) {
        let Some(store) = self.evidence else { return };
        match store.save_screenshot(step.step_id, phase, n, png) {
            Ok(path) => match phase {
                CapturePhase::Before => attempt.evidence.screenshot_before = Some(path),
                CapturePhase::After => attempt.evidence.screenshot_after = Some(path),
                CapturePhase::Failure => attempt.evidence.failure_screenshot = Some(path),
            },
            Err(e) => warn!(step_id = step.step_id, error = %e, "evidence_write_failed"),
        }
    }

    fn capture_failure_screenshot(&mut self, step: &Step, attempt: &mut Attempt) {
        if self.evidence.is_none() || !self.browser.is_alive() {
            return;
        }
        if let Ok(png) = self.browser.screenshot() {
            self.save_screenshot(step, CapturePhase::Failure, attempt.retry_count, &png, attempt);
        }
    }

    fn backoff(&self, failed_attempts: u32) {
        if self.options.backoff_ms == 0 {
            return;
        }
        let delay = self.options.backoff_ms
            * BACKOFF_FACTOR.saturating_pow(failed_attempts.saturating_sub(1));
        thread::sleep(Duration::from_millis(delay));
    }

    fn flat_delay(&self) {
        if self.options.backoff_ms > 0 {
            thread::sleep(Duration::from_millis(self.options.backoff_ms));
        }
    }
}

/// Settle time after an action, scaled from the configured base by how much
/// page churn the action kind typically causes.
fn settle_for(action: &Action, base_ms: u64) -> Duration {
    let ms = match action {
        Action::Navigate { .. }
        | Action::GoBack
        | Action::GoForward
        | Action::Search { .. } => base_ms * 3,
        Action::Click { .. } | Action::Drag { .. } | Action::KeyCombination { .. } => {
            base_ms * 3 / 2
        }
        Action::Input { .. } | Action::Scroll { .. } | Action::Hover { .. } => base_ms / 2,
        // These carry their own timing.
        Action::Verify | Action::Wait { .. } => 0,
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockBrowser, ScriptedFailure};
    use crate::locator::{LocateScript, ScriptedLocator};
    use crate::verifier::{ScriptedVerifier, VerifyScript};
    use pretty_assertions::assert_eq;

    fn click_step() -> Step {
        Step {
            step_id: 1,
            action: Action::Click {
                target: Target::Description("the Submit button".to_string()),
            },
            expected_visual: "A confirmation banner is shown".to_string(),
        }
    }

    fn navigate_step() -> Step {
        Step {
            step_id: 1,
            action: Action::Navigate { url: "https://example.com".to_string() },
            expected_visual: "The landing page is visible".to_string(),
        }
    }

    #[test]
    fn test_click_step_passes() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(100, 200));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.retry_count, 0);
        assert_eq!(result.action, "click");
        assert_eq!(browser.action_log(), &["click_at 100,200".to_string()]);
        let evidence = result.evidence.unwrap();
        assert_eq!(evidence.confidence, Some(0.9));
        assert!(evidence.element_description.unwrap().contains("Submit"));
    }

    #[test]
    fn test_locator_miss_retried_then_found() {
        let mut browser = MockBrowser::new();
        let locator =
            ScriptedLocator::always(LocateScript::Found(10, 10)).then(LocateScript::NotFound);
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.retry_count, 1);
        assert_eq!(locator.call_count(), 2);
    }

    #[test]
    fn test_locator_exhaustion_consumes_exactly_the_ceiling() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::NotFound);
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let mut options = RunOptions::immediate();
        options.max_retries_per_step = 2;

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::TargetNotFound));
        assert_eq!(result.retry_count, 2);
        assert_eq!(locator.call_count(), 2);
        // The verifier never ran; the step failed before verification.
        assert_eq!(verifier.call_count(), 0);
    }

    #[test]
    fn test_transient_navigation_error_retried() {
        let mut browser = MockBrowser::new();
        browser.script_failure(ScriptedFailure::Navigation);
        let locator = ScriptedLocator::always(LocateScript::Found(0, 0));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.85));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&navigate_step());

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.retry_count, 1);
        assert_eq!(browser.action_log(), &["navigate https://example.com".to_string()]);
    }

    #[test]
    fn test_persistent_action_failure_bounded() {
        let mut browser = MockBrowser::new();
        browser
            .script_failure(ScriptedFailure::Navigation)
            .script_failure(ScriptedFailure::Navigation)
            .script_failure(ScriptedFailure::Navigation);
        let locator = ScriptedLocator::always(LocateScript::Found(0, 0));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.85));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&navigate_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::ActionFailed));
        assert_eq!(result.retry_count, 3);
    }

    #[test]
    fn test_session_closed_is_fatal_not_retried() {
        let mut browser = MockBrowser::new();
        browser.script_failure(ScriptedFailure::SessionClosed);
        let locator = ScriptedLocator::always(LocateScript::Found(0, 0));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.85));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&navigate_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::SessionClosed));
        assert!(result.error.unwrap().is_fatal());
        assert_eq!(result.retry_count, 0);
    }

    #[test]
    fn test_confident_mismatch_not_retried() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(5, 5));
        let verifier = ScriptedVerifier::always(VerifyScript::Fail(0.4));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::VisualMismatch));
        assert_eq!(result.retry_count, 0);
        assert_eq!(verifier.call_count(), 1);
        let evidence = result.evidence.unwrap();
        assert_eq!(evidence.confidence, Some(0.4));
    }

    #[test]
    fn test_verifier_outage_bounded() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(5, 5));
        let verifier = ScriptedVerifier::always(VerifyScript::Unavailable);
        let mut options = RunOptions::immediate();
        options.max_retries_per_step = 2;

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::VerifierUnavailable));
        assert_eq!(verifier.call_count(), 2);
    }

    #[test]
    fn test_verifier_outage_honors_configured_ceiling() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(5, 5));
        let verifier = ScriptedVerifier::always(VerifyScript::Unavailable);
        let mut options = RunOptions::immediate();
        options.max_retries_per_step = 5;

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::VerifierUnavailable));
        assert_eq!(verifier.call_count(), 5);
        assert_eq!(result.retry_count, 5);
    }

    #[test]
    fn test_stale_target_reresolved_then_clicked() {
        let mut browser = MockBrowser::new();
        browser.script_failure(ScriptedFailure::TargetUnavailable);
        let locator = ScriptedLocator::always(LocateScript::Found(100, 200));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let options = RunOptions::immediate();

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.retry_count, 1);
        // The failed click forces a second resolve pass before the retry.
        assert_eq!(locator.call_count(), 2);
        assert_eq!(browser.action_log(), &["click_at 100,200".to_string()]);
    }

    #[test]
    fn test_stale_target_exhausts_configured_ceiling() {
        let mut browser = MockBrowser::new();
        browser
            .script_failure(ScriptedFailure::TargetUnavailable)
            .script_failure(ScriptedFailure::TargetUnavailable)
            .script_failure(ScriptedFailure::TargetUnavailable);
        let locator = ScriptedLocator::always(LocateScript::Found(100, 200));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let mut options = RunOptions::immediate();
        options.max_retries_per_step = 3;

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::ActionFailed));
        assert_eq!(result.retry_count, 3);
        assert_eq!(locator.call_count(), 3);
        assert_eq!(verifier.call_count(), 0);
    }

    #[test]
    fn test_locator_outage_exhausts_configured_ceiling() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Unavailable);
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let mut options = RunOptions::immediate();
        options.max_retries_per_step = 4;

        let result = StepExecutor::new(&mut browser, &locator, &verifier, &options)
            .execute(&click_step());

        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error, Some(StepErrorKind::LocatorUnavailable));
        assert_eq!(result.retry_count, 4);
        assert_eq!(locator.call_count(), 4);
        assert_eq!(verifier.call_count(), 0);
        assert_eq!(browser.action_count(), 0);
    }

    #[test]
    fn test_verify_step_performs_no_browser_action() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(0, 0));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.95));
        let options = RunOptions::immediate();
        let step = Step {
            step_id: 7,
            action: Action::Verify,
            expected_visual: "The cart shows 3 items".to_string(),
        };

        let result =
            StepExecutor::new(&mut browser, &locator, &verifier, &options).execute(&step);

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(browser.action_count(), 0);
        assert_eq!(locator.call_count(), 0);
    }

    #[test]
    fn test_input_clicks_then_types() {
        let mut browser = MockBrowser::new();
        let locator = ScriptedLocator::always(LocateScript::Found(40, 60));
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9));
        let options = RunOptions::immediate();
        let step = Step {
            step_id: 2,
            action: Action::Input {
                target: Target::Description("the email field".to_string()),
                value: "user@example.com".to_string(),
            },
            expected_visual: "The email is filled in".to_string(),
        };

        let result =
            StepExecutor::new(&mut browser, &locator, &verifier, &options).execute(&step);

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(
            browser.action_log(),
            &["click_at 40,60".to_string(), "type_text user@example.com".to_string()]
        );
    }
}
