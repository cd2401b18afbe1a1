// Execution Engine Module
// Stage sequencing, finalization, fan-out and progress events

pub mod collaborators;
pub mod events;
pub mod fanout;
pub mod ledger;
pub mod sequencer;
pub mod stages;
pub mod state;
pub mod sweep;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export key types
pub use collaborators::{BranchContext, BuildResult, Collaborators, HydraCollaborators};
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use fanout::{FanOutCoordinator, OverallStatus, RunSummary};
pub use ledger::{StageLedger, TerminalStage};
pub use sequencer::{BranchOutcome, BranchPlan, BranchStatus, StageSequencer, DEFAULT_AXIS_VARIABLE};
pub use stages::{Stage, StageRecord, StageStatus};
pub use state::RunnerIpFile;
pub use sweep::{FinalizationSweep, SweepReport};
