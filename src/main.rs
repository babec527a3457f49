//! Command-line entry point for QA Vision.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qa_vision::{
    ExecutionContext, LocateScript, MockBrowser, NullSink, ProgressEvent, RunOptions,
    ScriptedLocator, ScriptedVerifier, StepStatus, Verdict, VerifyScript, config,
    progress::ChannelSink, validate_submission, vision,
};

#[derive(Parser)]
#[command(name = "qa-vision", version, about = "Vision-driven browser QA test execution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a test plan file without executing it
    Validate {
        /// Path to the plan JSON file
        plan: PathBuf,

        /// Print the validation result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute a test plan
    Run {
        /// Path to the plan JSON file
        plan: PathBuf,

        /// Dry-run against the built-in mock browser session
        #[arg(long)]
        mock: bool,

        /// Skip the remaining steps after the first failure
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        stop_on_failure: bool,

        /// Start execution from this step id
        #[arg(long)]
        start_from_step: Option<u32>,

        /// Per-step retry ceiling (overrides configuration)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Print the final report as JSON instead of Markdown
        #[arg(long)]
        json: bool,
    },

    /// Execute a single step of a test plan
    Step {
        /// Path to the plan JSON file
        plan: PathBuf,

        /// The step id to execute
        step_id: u32,

        /// Dry-run against the built-in mock browser session
        #[arg(long)]
        mock: bool,
    },

    /// Check that the vision endpoint is reachable
    Check,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { plan, json } => cmd_validate(&plan, json),
        Command::Run { plan, mock, stop_on_failure, start_from_step, max_retries, json } => {
            cmd_run(&plan, mock, stop_on_failure, start_from_step, max_retries, json)
        }
        Command::Step { plan, step_id, mock } => cmd_step(&plan, step_id, mock),
        Command::Check => cmd_check(),
    }
}

fn read_plan(path: &PathBuf) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Cannot read {}: {}", path.display(), e);
        ExitCode::from(2)
    })
}

fn cmd_validate(path: &PathBuf, json: bool) -> ExitCode {
    let raw = match read_plan(path) {
        Ok(raw) => raw,
        Err(code) => return code,
    };
    let validation = validate_submission(&raw);
    if json {
        match serde_json::to_string_pretty(&validation) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Serialization failed: {}", e);
                return ExitCode::from(2);
            }
        }
    } else if validation.valid {
        println!("Plan is valid ({} steps)", validation.total_steps.unwrap_or(0));
    } else {
        println!(
            "Plan is invalid: {}",
            validation.error.as_deref().unwrap_or("unknown error")
        );
    }
    if validation.valid { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Build a context around the mock session. Real browser drivers plug in
/// through the library API; the CLI ships the mock for plan dry-runs.
fn mock_context(sink: Box<dyn qa_vision::ProgressSink>) -> ExecutionContext {
    ExecutionContext::new(
        Box::new(MockBrowser::new()),
        Box::new(ScriptedLocator::always(LocateScript::Found(640, 400))),
        Box::new(ScriptedVerifier::always(VerifyScript::Pass(0.9))),
        sink,
    )
}

fn cmd_run(
    path: &PathBuf,
    mock: bool,
    stop_on_failure: bool,
    start_from_step: Option<u32>,
    max_retries: Option<u32>,
    json: bool,
) -> ExitCode {
    if !mock {
        eprintln!(
            "No browser driver is configured for this build; pass --mock to dry-run \
             the plan, or embed the engine through the library API with your driver."
        );
        return ExitCode::from(2);
    }
    let raw = match read_plan(path) {
        Ok(raw) => raw,
        Err(code) => return code,
    };

    let (sink, rx) = ChannelSink::new();
    let ctx = mock_context(Box::new(sink));

    let validation = ctx.submit_plan(&raw);
    if !validation.valid {
        eprintln!(
            "Plan rejected: {}",
            validation.error.as_deref().unwrap_or("unknown error")
        );
        return ExitCode::FAILURE;
    }

    let mut options = RunOptions::default();
    options.stop_on_failure = stop_on_failure;
    options.start_from_step = start_from_step;
    options.settle_ms = 0;
    if let Some(retries) = max_retries {
        options.max_retries_per_step = retries;
    }

    if let Err(e) = ctx.execute(options) {
        eprintln!("Cannot start run: {}", e);
        return ExitCode::from(2);
    }

    let mut verdict = Verdict::Fail;
    for event in rx {
        match event {
            ProgressEvent::RunStarted { run_id, total_steps, .. } => {
                println!("Run {} started ({} steps)", run_id, total_steps);
            }
            ProgressEvent::StepUpdate { step_id, status, message, .. } => {
                if status == StepStatus::Running {
                    continue;
                }
                match message {
                    Some(msg) => println!("  step {}: {:?} - {}", step_id, status, msg),
                    None => println!("  step {}: {:?}", step_id, status),
                }
            }
            ProgressEvent::RunFinished { report, .. } => {
                verdict = report.overall_status;
                if json {
                    match serde_json::to_string_pretty(&report) {
                        Ok(out) => println!("{}", out),
                        Err(e) => eprintln!("Serialization failed: {}", e),
                    }
                } else {
                    println!();
                    println!("{}", report.render_markdown());
                }
                break;
            }
        }
    }
    ctx.wait();

    if verdict == Verdict::Pass { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn cmd_step(path: &PathBuf, step_id: u32, mock: bool) -> ExitCode {
    if !mock {
        eprintln!("No browser driver is configured for this build; pass --mock.");
        return ExitCode::from(2);
    }
    let raw = match read_plan(path) {
        Ok(raw) => raw,
        Err(code) => return code,
    };

    let ctx = mock_context(Box::new(NullSink));
    let validation = ctx.submit_plan(&raw);
    if !validation.valid {
        eprintln!(
            "Plan rejected: {}",
            validation.error.as_deref().unwrap_or("unknown error")
        );
        return ExitCode::FAILURE;
    }

    let mut options = RunOptions::default();
    options.settle_ms = 0;
    if let Err(e) = ctx.execute_step(step_id, options) {
        eprintln!("Cannot execute step {}: {}", step_id, e);
        return ExitCode::from(2);
    }
    ctx.wait();

    let Some(state) = ctx.state() else {
        eprintln!("Step {} produced no result", step_id);
        return ExitCode::FAILURE;
    };
    match state.latest_result(step_id) {
        Some(result) => {
            println!(
                "step {}: {:?} ({} ms, {} retries)",
                result.step_id, result.status, result.duration_ms, result.retry_count
            );
            if let Some(msg) = &result.error_message {
                println!("  {}", msg);
            }
            if result.status == StepStatus::Pass {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            eprintln!("Step {} produced no result", step_id);
            ExitCode::FAILURE
        }
    }
}

fn cmd_check() -> ExitCode {
    let endpoint = config::endpoint();
    let timeout = config::get().vision.connect_timeout;
    match vision::check_health(&endpoint, timeout) {
        Ok(true) => {
            println!("Vision endpoint {} is reachable", endpoint);
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("Vision endpoint {} did not respond", endpoint);
            ExitCode::FAILURE
        }
        Err(e) => {
            println!("Vision endpoint {} check failed: {}", endpoint, e);
            ExitCode::FAILURE
        }
    }
}
