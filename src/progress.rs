//! Progress events emitted during a run.
//!
//! Sinks receive events strictly in execution order. Delivery is best-effort:
//! a sink that has gone away (e.g., a dropped channel receiver) never blocks
//! or cancels the run.

use serde::{Deserialize, Serialize};
use std::sync::mpsc;

use crate::report::{ExecutionReport, StepStatus};

/// One progress event, serializable for transport to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A run started
    RunStarted {
        run_id: String,
        plan_id: String,
        total_steps: usize,
    },

    /// A step changed status
    StepUpdate {
        run_id: String,
        step_id: u32,
        status: StepStatus,
        /// Attempt detail or failure explanation, when available
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Path to the most relevant screenshot, when captured
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
    },

    /// The run reached a terminal status
    RunFinished {
        run_id: String,
        report: ExecutionReport,
    },
}

impl ProgressEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            ProgressEvent::RunStarted { run_id, .. } => run_id,
            ProgressEvent::StepUpdate { run_id, .. } => run_id,
            ProgressEvent::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Receiver of progress events.
///
/// Implementations must be cheap and non-blocking; the runner calls `emit`
/// from its execution thread between phases.
pub trait ProgressSink: Send {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards every event.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink backed by a standard mpsc channel.
///
/// `send` on a disconnected channel is ignored; the run proceeds without
/// observers.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver observers read from.
    pub fn new() -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sink that forwards each event to every inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
