//! QA Vision - Browser QA testing driven by vision model grounding.
//!
//! This crate provides:
//! - Declarative JSON test plans (semantic targets, no selectors)
//! - Vision-model target location and visual verification
//! - A step executor with phase-aware retry policy
//! - A single-flight plan runner with stop/resume support
//! - MockBrowser, ScriptedLocator, and ScriptedVerifier for testing
//! - Evidence storage (screenshots plus JSON/Markdown reports) per run
//!
//! # Example
//!
//! ```rust,no_run
//! use qa_vision::{
//!     ExecutionContext, LocateScript, MockBrowser, NullSink, RunOptions,
//!     ScriptedLocator, ScriptedVerifier, VerifyScript,
//! };
//!
//! let ctx = ExecutionContext::new(
//!     Box::new(MockBrowser::new()),
//!     Box::new(ScriptedLocator::always(LocateScript::Found(640, 400))),
//!     Box::new(ScriptedVerifier::always(VerifyScript::Pass(0.9))),
//!     Box::new(NullSink),
//! );
//!
//! let plan = std::fs::read_to_string("plan.json").unwrap();
//! assert!(ctx.submit_plan(&plan).valid);
//! ctx.execute(RunOptions::default()).unwrap();
//! ctx.wait();
//! println!("{}", ctx.report().unwrap().render_markdown());
//! ```

pub mod browser;
pub mod config;
pub mod engine;
pub mod evidence;
pub mod executor;
pub mod locator;
pub mod plan;
pub mod progress;
pub mod report;
pub mod runner;
pub mod verifier;
pub mod vision;

// Re-export plan model
pub use plan::{
    Action, ActionKind, PlanError, PlanRecord, PlanResult, PlanValidation,
    ScrollDirection, Step, StepRecord, Target, TestPlan, validate_submission,
};

// Re-export result and report types
pub use report::{
    ExecutionReport, ExecutionState, RunStatus, StepErrorKind, StepEvidence, StepResult,
    StepStatus, Verdict,
};

// Re-export browser session contract and mock
pub use browser::{
    BrowserError, BrowserResult, BrowserSession, MockBrowser, Point, ScriptedFailure,
};

// Re-export locator and verifier seams
pub use locator::{
    ElementLocation, LocateOutcome, LocateScript, LocatorError, LocatorResult,
    ScriptedLocator, TargetLocator, VisionLocator,
};
pub use verifier::{
    ScriptedVerifier, Verification, VerifierError, VerifierResult, VerifyScript,
    VisionJudge, VisualVerifier,
};

// Re-export execution machinery
pub use engine::{EngineError, EngineResult, ExecutionContext};
pub use executor::{RunOptions, StepExecutor};
pub use runner::{PlanRunner, RunSummary, RunnerError, RunnerResult, new_run_id};

// Re-export progress channel
pub use progress::{ChannelSink, FanoutSink, NullSink, ProgressEvent, ProgressSink};

// Re-export evidence storage
pub use evidence::{CapturePhase, EvidenceStore, cleanup_old_runs, sanitize_name};

// Re-export vision client
pub use vision::{VisionConfig, VisionError, VisionResult, check_health, query_image};
