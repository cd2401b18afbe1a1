// Stages
// The fixed per-branch stage sequence and the records it produces

use crate::budget::Allocation;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::ledger::TerminalStage;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One named unit of work in the branch sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Checkout,
    ComputeBudget,
    CreateRunner,
    RunTest,
    CollectLogs,
    CleanResources,
    SendEmail,
}

impl Stage {
    /// Main sequence order
    pub const SEQUENCE: [Stage; 7] = [
        Stage::Checkout,
        Stage::ComputeBudget,
        Stage::CreateRunner,
        Stage::RunTest,
        Stage::CollectLogs,
        Stage::CleanResources,
        Stage::SendEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Checkout => "checkout",
            Stage::ComputeBudget => "compute_budget",
            Stage::CreateRunner => "create_runner",
            Stage::RunTest => "run_test",
            Stage::CollectLogs => "collect_logs",
            Stage::CleanResources => "clean_resources",
            Stage::SendEmail => "send_email",
        }
    }

    /// Ledger entry this stage maintains, if it is a terminal stage
    pub fn terminal(&self) -> Option<TerminalStage> {
        match self {
            Stage::CleanResources => Some(TerminalStage::CleanResources),
            Stage::SendEmail => Some(TerminalStage::SendEmail),
            _ => None,
        }
    }

    /// Budget entry bounding this stage
    pub fn allocation(&self) -> Option<Allocation> {
        match self {
            Stage::Checkout | Stage::ComputeBudget => None,
            Stage::CreateRunner => Some(Allocation::RunnerProvision),
            Stage::RunTest => Some(Allocation::TestRun),
            Stage::CollectLogs => Some(Allocation::LogCollect),
            Stage::CleanResources => Some(Allocation::ResourceCleanup),
            Stage::SendEmail => Some(Allocation::SendEmail),
        }
    }
}

impl From<TerminalStage> for Stage {
    fn from(stage: TerminalStage) -> Self {
        match stage {
            TerminalStage::CleanResources => Stage::CleanResources,
            TerminalStage::SendEmail => Stage::SendEmail,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Ran past its own allocation or was interrupted by the branch limit
    TimedOut,
    /// Not applicable to this branch (e.g. no runner for the backend)
    Skipped,
}

impl StageStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed | StageStatus::TimedOut)
    }
}

/// Outcome of one stage attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn succeeded(stage: Stage, duration: Duration) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            duration,
            error: None,
        }
    }

    pub fn failed(stage: Stage, status: StageStatus, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            stage,
            status,
            duration,
            error: Some(error.into()),
        }
    }

    /// Record for a finished attempt; timeouts map to `TimedOut`
    pub fn from_result<T>(stage: Stage, duration: Duration, result: &ServiceResult<T>) -> Self {
        match result {
            Ok(_) => Self::succeeded(stage, duration),
            Err(e @ ServiceError::Timeout { .. }) => Self::failed(stage, StageStatus::TimedOut, duration, e.to_string()),
            Err(e) => Self::failed(stage, StageStatus::Failed, duration, e.to_string()),
        }
    }

    pub fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            duration: Duration::ZERO,
            error: Some(reason.into()),
        }
    }
}

/// Serialise durations as fractional seconds
pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
