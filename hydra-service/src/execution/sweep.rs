// Finalization Sweep
// Best-effort pass that archives artifacts and runs terminal stages the main sequence missed

use crate::budget::{Allocation, TimeoutBudget};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::collaborators::{BranchContext, BuildResult, Collaborators};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::ledger::{StageLedger, TerminalStage};
use crate::execution::stages::{Stage, StageRecord};
use crate::runners::TargetMode;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Body of a terminal stage. Bounded by the stage's own allocation and
/// marked in the ledger once the body has finished, whatever its result.
pub(crate) async fn run_terminal_stage(
    collaborators: &dyn Collaborators,
    ctx: &BranchContext,
    ledger: &mut StageLedger,
    stage: TerminalStage,
    target: TargetMode,
    budget: &TimeoutBudget,
    build_result: BuildResult,
) -> ServiceResult<()> {
    let allocation = Stage::from(stage)
        .allocation()
        .ok_or_else(|| ServiceError::config(format!("{} has no budget entry", stage)))?;
    let limit = budget.limit(allocation);

    let body = async {
        match stage {
            TerminalStage::CleanResources => collaborators.cleanup_resources(ctx, target, limit).await,
            TerminalStage::SendEmail => collaborators.send_email(ctx, build_result, limit).await,
        }
    };
    let result = tokio::time::timeout(limit, body)
        .await
        .unwrap_or_else(|_| {
            Err(ServiceError::Timeout {
                stage: stage.as_str().to_string(),
                limit,
            })
        });

    ledger.mark_complete(stage);
    result
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub artifacts_collected: bool,
    /// Terminal stages re-invoked because the ledger showed them missing
    pub reinvoked: Vec<TerminalStage>,
    /// One record per re-invoked stage
    pub records: Vec<StageRecord>,
    /// Failures that were logged and swallowed
    pub errors: Vec<String>,
}

/// Runs after a branch's main sequence, whatever state it ended in
#[derive(Clone)]
pub struct FinalizationSweep {
    collaborators: Arc<dyn Collaborators>,
    event_tx: Option<ProgressSender>,
}

impl FinalizationSweep {
    pub fn new(collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            collaborators,
            event_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Archive artifacts, then run every terminal stage the ledger lacks, in
    /// order. Never fails: problems are logged and reported. Archiving is
    /// bounded by the log collection allocation.
    pub async fn run(
        &self,
        ctx: &BranchContext,
        ledger: &mut StageLedger,
        target: TargetMode,
        budget: &TimeoutBudget,
        build_result: BuildResult,
        artifacts_destination: &Path,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let limit = budget.limit(Allocation::LogCollect);
        let copied = tokio::time::timeout(
            limit,
            self.collaborators.copy_artifacts(ctx, target, artifacts_destination),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ServiceError::Timeout {
                stage: "copy_artifacts".to_string(),
                limit,
            })
        });
        match copied {
            Ok(()) => {
                info!(axis = %ctx.axis, destination = %artifacts_destination.display(), "artifacts archived");
                report.artifacts_collected = true;
            }
            Err(e) => {
                warn!(axis = %ctx.axis, error = %e, "artifact retrieval failed");
                report.errors.push(format!("copy_artifacts: {}", e));
            }
        }
        self.event_tx.send_event(ExecutionEvent::ArtifactsArchived {
            axis: ctx.axis.clone(),
            success: report.artifacts_collected,
        });

        for stage in ledger.missing() {
            info!(axis = %ctx.axis, stage = %stage, "terminal stage missed by main sequence, running it now");
            let started = Instant::now();
            let result = run_terminal_stage(
                self.collaborators.as_ref(),
                ctx,
                ledger,
                stage,
                target,
                budget,
                build_result,
            )
            .await;

            if let Err(e) = &result {
                error!(axis = %ctx.axis, stage = %stage, error = %e, "finalization step failed");
                report.errors.push(format!("{}: {}", stage, e));
            }
            report.reinvoked.push(stage);
            report
                .records
                .push(StageRecord::from_result(Stage::from(stage), started.elapsed(), &result));
            self.event_tx.send_event(ExecutionEvent::SweepInvoked {
                axis: ctx.axis.clone(),
                stage,
                success: result.is_ok(),
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::budget;
    use crate::config::models::Backend;
    use crate::execution::fakes::{branch_context, ScriptedCollaborators};

    fn budget_for_tests() -> TimeoutBudget {
        budget(180, Backend::Aws, "eu-west-1").unwrap()
    }

    #[tokio::test]
    async fn test_sweep_runs_only_missing_stages() {
        let fake = Arc::new(ScriptedCollaborators::new());
        let sweep = FinalizationSweep::new(fake.clone());
        let ctx = branch_context("a");
        let mut ledger = StageLedger::new();
        ledger.mark_complete(TerminalStage::CleanResources);

        let report = sweep
            .run(&ctx, &mut ledger, TargetMode::Local, &budget_for_tests(), BuildResult::Failure, Path::new("/tmp/a"))
            .await;

        assert_eq!(report.reinvoked, vec![TerminalStage::SendEmail]);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].stage, Stage::SendEmail);
        assert!(report.artifacts_collected);
        assert_eq!(fake.names(), vec!["copy_artifacts", "send_email"]);
        assert!(ledger.all_complete());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let fake = Arc::new(ScriptedCollaborators::new());
        let sweep = FinalizationSweep::new(fake.clone());
        let ctx = branch_context("a");
        let mut ledger = StageLedger::new();
        let budget = budget_for_tests();

        let first = sweep
            .run(&ctx, &mut ledger, TargetMode::Local, &budget, BuildResult::Failure, Path::new("/tmp/a"))
            .await;
        let after_first = ledger.clone();
        let second = sweep
            .run(&ctx, &mut ledger, TargetMode::Local, &budget, BuildResult::Failure, Path::new("/tmp/a"))
            .await;

        assert_eq!(first.reinvoked, vec![TerminalStage::CleanResources, TerminalStage::SendEmail]);
        assert!(second.reinvoked.is_empty());
        assert_eq!(ledger, after_first);
        assert_eq!(fake.count("clean_resources"), 1);
        assert_eq!(fake.count("send_email"), 1);
    }

    #[tokio::test]
    async fn test_sweep_swallows_failures() {
        let fake = Arc::new(
            ScriptedCollaborators::new()
                .fail(Stage::CleanResources)
                .fail_artifacts(),
        );
        let sweep = FinalizationSweep::new(fake.clone());
        let ctx = branch_context("a");
        let mut ledger = StageLedger::new();

        let report = sweep
            .run(&ctx, &mut ledger, TargetMode::Local, &budget_for_tests(), BuildResult::Failure, Path::new("/tmp/a"))
            .await;

        assert!(!report.artifacts_collected);
        assert_eq!(report.errors.len(), 2);
        let statuses: Vec<_> = report.records.iter().map(|r| (r.stage, r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (Stage::CleanResources, crate::execution::stages::StageStatus::Failed),
                (Stage::SendEmail, crate::execution::stages::StageStatus::Succeeded),
            ]
        );
        // a failed body still counts as having run
        assert!(ledger.is_complete(TerminalStage::CleanResources));
        assert_eq!(fake.names(), vec!["copy_artifacts", "clean_resources", "send_email"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_stage_timeout_still_marks_ledger() {
        let fake = ScriptedCollaborators::new().delay(Stage::CleanResources, std::time::Duration::from_secs(4 * 3600));
        let ctx = branch_context("a");
        let mut ledger = StageLedger::new();

        let err = run_terminal_stage(
            &fake,
            &ctx,
            &mut ledger,
            TerminalStage::CleanResources,
            TargetMode::Local,
            &budget_for_tests(),
            BuildResult::Success,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::Timeout { .. }));
        assert!(ledger.is_complete(TerminalStage::CleanResources));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_artifact_copy_is_bounded() {
        let fake = Arc::new(ScriptedCollaborators::new().delay_artifacts(std::time::Duration::from_secs(24 * 3600)));
        let sweep = FinalizationSweep::new(fake.clone());
        let ctx = branch_context("a");
        let mut ledger = StageLedger::new();
        let budget = budget_for_tests();
        let started = tokio::time::Instant::now();

        let report = sweep
            .run(&ctx, &mut ledger, TargetMode::Local, &budget, BuildResult::Failure, Path::new("/tmp/a"))
            .await;

        assert!(!report.artifacts_collected);
        assert!(report.errors[0].starts_with("copy_artifacts: "));
        assert!(report.errors[0].contains("copy_artifacts"));
        assert!(started.elapsed() < std::time::Duration::from_secs(24 * 3600));
        // terminal stages still run after the timed out copy
        assert!(ledger.all_complete());
        assert_eq!(fake.names(), vec!["copy_artifacts", "clean_resources", "send_email"]);
    }
}
