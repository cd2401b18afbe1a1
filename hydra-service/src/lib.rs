// Hydra Service Library
// Run orchestration with guaranteed finalization for long-running database tests

pub mod budget;
pub mod config;
pub mod error;
pub mod execution;
pub mod runners;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export configuration types
pub use config::{
    resolve, Backend, EnvironmentResolver, HydraSettings, RawParams, RunConfiguration,
    SelectorPolicy,
};

// Re-export budget types
pub use budget::{budget, Allocation, RunnerSizing, TimeoutBudget};

// Re-export execution types
pub use execution::{
    progress_channel, BranchOutcome, BranchPlan, BranchStatus, BuildResult, ExecutionEvent,
    FanOutCoordinator, HydraCollaborators, LogLevel, OverallStatus, ProgressReceiver,
    ProgressSender, RunSummary, RunnerIpFile, Stage, StageLedger, StageRecord, StageSequencer,
    StageStatus, TerminalStage, DEFAULT_AXIS_VARIABLE,
};

// Re-export runner types
pub use runners::{
    CommandExecutor, CommandSpec, Dispatcher, DryRunExecutor, EnvForwarder, ProcessExecutor,
    TargetMode,
};
