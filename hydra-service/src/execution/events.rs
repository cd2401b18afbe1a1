// Execution Events
// Progress reporting for branches, stages and the finalization sweep

use crate::execution::fanout::OverallStatus;
use crate::execution::ledger::TerminalStage;
use crate::execution::sequencer::BranchStatus;
use crate::execution::stages::{Stage, StageStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a run executes
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Fan-out started
    RunStarted { total_branches: usize },

    /// All branches reached a terminal state
    RunCompleted {
        overall: OverallStatus,
        duration: Duration,
    },

    /// One branch started
    BranchStarted { axis: String, test_id: String },

    /// One branch finished, including its sweep
    BranchCompleted {
        axis: String,
        status: BranchStatus,
        duration: Duration,
    },

    /// Stage execution started
    StageStarted { axis: String, stage: Stage },

    /// Stage execution completed
    StageCompleted {
        axis: String,
        stage: Stage,
        status: StageStatus,
        duration: Duration,
        error: Option<String>,
    },

    /// The sweep re-ran a terminal stage that the main sequence missed
    SweepInvoked {
        axis: String,
        stage: TerminalStage,
        success: bool,
    },

    /// Artifact retrieval finished
    ArtifactsArchived { axis: String, success: bool },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        axis: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn stage_started(axis: impl Into<String>, stage: Stage) -> Self {
        Self::StageStarted {
            axis: axis.into(),
            stage,
        }
    }

    pub fn stage_completed(
        axis: impl Into<String>,
        stage: Stage,
        status: StageStatus,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        Self::StageCompleted {
            axis: axis.into(),
            stage,
            status,
            duration,
            error,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, axis: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            axis,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, axis: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            axis,
        }
    }

    /// Axis the event belongs to, if any
    pub fn axis(&self) -> Option<&str> {
        match self {
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
            Self::BranchStarted { axis, .. }
            | Self::BranchCompleted { axis, .. }
            | Self::StageStarted { axis, .. }
            | Self::StageCompleted { axis, .. }
            | Self::SweepInvoked { axis, .. }
            | Self::ArtifactsArchived { axis, .. } => Some(axis),
            Self::Log { axis, .. } => axis.as_deref(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
