//! Execution context: the single-flight facade over plan execution.
//!
//! One context owns one browser session and at most one run at a time.
//! `execute`, `execute_step`, and `resume` hand the work to a worker thread
//! and return immediately; a second request while a run is in flight is
//! rejected with `EngineError::Busy`, never queued. Observers follow the
//! progress sink or poll `state()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::browser::BrowserSession;
use crate::evidence::EvidenceStore;
use crate::executor::RunOptions;
use crate::locator::TargetLocator;
use crate::plan::{PlanValidation, TestPlan};
use crate::progress::ProgressSink;
use crate::report::{ExecutionReport, ExecutionState, RunStatus, StepStatus};
use crate::runner::{self, PlanRunner};
use crate::verifier::VisualVerifier;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A run is already in flight; requests are rejected, never queued
    Busy,

    /// No valid plan has been submitted
    NoPlan,

    /// The requested step id is not in the current plan
    UnknownStep(u32),

    /// Resume was requested but no step has failed
    NoFailedStep,

    /// The browser session was not returned by a previous run
    SessionUnavailable,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Busy => write!(f, "A run is already in progress"),
            EngineError::NoPlan => write!(f, "No plan has been submitted"),
            EngineError::UnknownStep(id) => write!(f, "Step {} is not in the plan", id),
            EngineError::NoFailedStep => write!(f, "No failed step to resume from"),
            EngineError::SessionUnavailable => write!(f, "Browser session is unavailable"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Everything a worker thread needs to execute steps.
struct Toolkit {
    browser: Box<dyn BrowserSession>,
    locator: Box<dyn TargetLocator>,
    verifier: Box<dyn VisualVerifier>,
    sink: Box<dyn ProgressSink>,
}

enum Task {
    RunAll,
    SingleStep(u32),
    Resume(ExecutionState),
}

struct Shared {
    plan: Mutex<Option<TestPlan>>,
    toolkit: Mutex<Option<Toolkit>>,
    state: Mutex<Option<ExecutionState>>,
    report: Mutex<Option<ExecutionReport>>,
    evidence: Mutex<Option<EvidenceStore>>,
    busy: AtomicBool,
    stop: Arc<AtomicBool>,
}

// A panicked holder has nothing half-written we care about; take the guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns one browser session and runs at most one plan at a time.
pub struct ExecutionContext {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionContext {
    pub fn new(
        browser: Box<dyn BrowserSession>,
        locator: Box<dyn TargetLocator>,
        verifier: Box<dyn VisualVerifier>,
        sink: Box<dyn ProgressSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                plan: Mutex::new(None),
                toolkit: Mutex::new(Some(Toolkit { browser, locator, verifier, sink })),
                state: Mutex::new(None),
                report: Mutex::new(None),
                evidence: Mutex::new(None),
                busy: AtomicBool::new(false),
                stop: Arc::new(AtomicBool::new(false)),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Validate a plan submission and, when valid, make it the current plan.
    /// Rejected while a run is in flight.
    pub fn submit_plan(&self, json: &str) -> PlanValidation {
        if self.is_busy() {
            return PlanValidation::rejected(EngineError::Busy);
        }
        match TestPlan::from_json(json) {
            Ok(new_plan) => {
                let total = new_plan.steps.len();
                *lock(&self.shared.plan) = Some(new_plan);
                *lock(&self.shared.state) = None;
                *lock(&self.shared.report) = None;
                *lock(&self.shared.evidence) = None;
                PlanValidation::accepted(total)
            }
            Err(e) => PlanValidation::rejected(e),
        }
    }

    /// Run the whole current plan asynchronously.
    pub fn execute(&self, options: RunOptions) -> EngineResult<()> {
        self.start(Task::RunAll, options)
    }

    /// Run a single step of the current plan asynchronously.
    pub fn execute_step(&self, step_id: u32, options: RunOptions) -> EngineResult<()> {
        {
            let plan = lock(&self.shared.plan);
            let plan = plan.as_ref().ok_or(EngineError::NoPlan)?;
            if plan.get_step(step_id).is_none() {
                return Err(EngineError::UnknownStep(step_id));
            }
        }
        self.start(Task::SingleStep(step_id), options)
    }

    /// Re-run from the first failed step of the previous run.
    pub fn resume(&self, options: RunOptions) -> EngineResult<()> {
        // Busy wins over NoFailedStep: the live run's state has no failures
        // yet and must not leak into the precondition check.
        if self.is_busy() {
            return Err(EngineError::Busy);
        }
        let prior = lock(&self.shared.state)
            .clone()
            .ok_or(EngineError::NoFailedStep)?;
        if !prior.step_statuses.values().any(|s| *s == StepStatus::Fail) {
            return Err(EngineError::NoFailedStep);
        }
        self.start(Task::Resume(prior), options)
    }

    /// Request a cooperative stop at the next step boundary. No-op when idle.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a run is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Snapshot of the current (or most recent) run state.
    pub fn state(&self) -> Option<ExecutionState> {
        lock(&self.shared.state).clone()
    }

    /// Report of the most recent terminated run.
    pub fn report(&self) -> Option<ExecutionReport> {
        lock(&self.shared.report).clone()
    }

    /// Screenshot paths stored for a step during the most recent run.
    pub fn evidence_for_step(&self, step_id: u32) -> Vec<std::path::PathBuf> {
        match lock(&self.shared.evidence).as_ref() {
            Some(store) => store.screenshots_for_step(step_id).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Block until the in-flight run (if any) terminates.
    pub fn wait(&self) {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn start(&self, task: Task, options: RunOptions) -> EngineResult<()> {
        // Single flight: exactly one winner; losers are rejected.
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Busy);
        }

        let plan = match lock(&self.shared.plan).clone() {
            Some(plan) => plan,
            None => {
                self.shared.busy.store(false, Ordering::SeqCst);
                return Err(EngineError::NoPlan);
            }
        };
        let toolkit = match lock(&self.shared.toolkit).take() {
            Some(toolkit) => toolkit,
            None => {
                self.shared.busy.store(false, Ordering::SeqCst);
                return Err(EngineError::SessionUnavailable);
            }
        };

        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);

        // A previous run's thread is already finished once busy was false;
        // reap it so handles do not pile up.
        let mut slot = lock(&self.handle);
        if let Some(old) = slot.take() {
            let _ = old.join();
        }
        *slot = Some(thread::spawn(move || run_task(shared, plan, toolkit, task, options)));
        Ok(())
    }
}

fn run_task(
    shared: Arc<Shared>,
    plan: TestPlan,
    mut toolkit: Toolkit,
    task: Task,
    options: RunOptions,
) {
    match task {
        Task::RunAll | Task::Resume(_) => {
            let run_id = runner::new_run_id(&plan.plan_id);
            let evidence = match EvidenceStore::create(&run_id) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "evidence_dir_failed");
                    None
                }
            };

            // Make the run observable while it is in flight.
            {
                let mut live =
                    ExecutionState::new(run_id.clone(), plan.steps.iter().map(|s| s.step_id));
                live.status = RunStatus::Running;
                *lock(&shared.state) = Some(live);
            }

            let mut runner = PlanRunner::new(
                &plan,
                toolkit.browser.as_mut(),
                toolkit.locator.as_ref(),
                toolkit.verifier.as_ref(),
                toolkit.sink.as_ref(),
            )
            .with_stop_flag(Arc::clone(&shared.stop))
            .with_run_id(run_id);
            if let Some(store) = &evidence {
                runner = runner.with_evidence(store);
            }

            let outcome = match &task {
                Task::Resume(prior) => runner.resume(prior, &options),
                _ => runner.run_all(&options),
            };
            match outcome {
                Ok(summary) => {
                    *lock(&shared.state) = Some(summary.state);
                    *lock(&shared.report) = Some(summary.report);
                }
                Err(e) => {
                    warn!(error = %e, "run_start_failed");
                    *lock(&shared.state) = None;
                }
            }
            *lock(&shared.evidence) = evidence;
        }
        Task::SingleStep(step_id) => {
            // Reuse the existing state so sibling statuses survive, or start
            // a fresh one for a first-time single-step run.
            let mut state = lock(&shared.state).clone().unwrap_or_else(|| {
                ExecutionState::new(
                    runner::new_run_id(&plan.plan_id),
                    plan.steps.iter().map(|s| s.step_id),
                )
            });

            let evidence = lock(&shared.evidence).clone();
            let mut runner = PlanRunner::new(
                &plan,
                toolkit.browser.as_mut(),
                toolkit.locator.as_ref(),
                toolkit.verifier.as_ref(),
                toolkit.sink.as_ref(),
            );
            if let Some(store) = &evidence {
                runner = runner.with_evidence(store);
            }
            match runner.run_single_step(step_id, &options, &mut state) {
                Ok(_) => {}
                Err(e) => warn!(error = %e, "single_step_failed"),
            }
            *lock(&shared.state) = Some(state);
        }
    }

    *lock(&shared.toolkit) = Some(toolkit);
    shared.busy.store(false, Ordering::SeqCst);
}
