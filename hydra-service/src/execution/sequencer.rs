// Stage Sequencer
// Runs the fixed stage sequence for one branch and hands over to the finalization sweep

use crate::budget::{budget, Allocation, TimeoutBudget};
use crate::config::models::RunConfiguration;
use crate::config::{EnvironmentResolver, RawParams};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::collaborators::{BranchContext, BuildResult, Collaborators};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::ledger::{StageLedger, TerminalStage};
use crate::execution::stages::{duration_secs, Stage, StageRecord, StageStatus};
use crate::execution::sweep::{run_terminal_stage, FinalizationSweep};
use crate::runners::TargetMode;

use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Variable carrying the branch's test id
pub const TEST_ID_VARIABLE: &str = "SCT_TEST_ID";

/// Variable the axis value is exported as unless configured otherwise
pub const DEFAULT_AXIS_VARIABLE: &str = "SCT_INSTANCE_TYPE_DB";

/// Directory inside the branch workspace receiving archived artifacts
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Input for one branch
#[derive(Debug, Clone, PartialEq)]
pub struct BranchPlan {
    pub axis: String,
    /// Variable the axis value is exported as, if any
    pub axis_variable: Option<String>,
    pub params: RawParams,
    pub workdir: PathBuf,
    pub test_id: String,
}

impl BranchPlan {
    /// Plan with its own workspace under `root` and a fresh test id
    pub fn new(axis: impl Into<String>, params: RawParams, root: &Path) -> Self {
        let axis = axis.into();
        Self {
            workdir: root.join(workspace_name(&axis)),
            axis,
            axis_variable: None,
            params,
            test_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_axis_variable(mut self, name: impl Into<String>) -> Self {
        self.axis_variable = Some(name.into());
        self
    }

    /// Environment handed to every command of the branch
    fn environment(&self, config: &RunConfiguration) -> BTreeMap<String, String> {
        let mut env = config.env_overlay.clone();
        env.insert(TEST_ID_VARIABLE.to_string(), self.test_id.clone());
        if let Some(variable) = &self.axis_variable {
            env.insert(variable.clone(), self.axis.clone());
        }
        env
    }
}

/// Directory name for an axis value
pub fn workspace_name(axis: &str) -> String {
    let name: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.trim_matches('.') {
        "" => "default".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Final state of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Every main-sequence stage succeeded or was not applicable
    Passed,
    /// The main sequence failed, finalization completed
    Degraded,
    /// Fatal configuration or validation error, or finalization incomplete
    Failed,
}

impl BranchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Passed => "passed",
            BranchStatus::Degraded => "degraded",
            BranchStatus::Failed => "failed",
        }
    }
}

/// Result of one branch
#[derive(Debug, Clone, Serialize)]
pub struct BranchOutcome {
    pub axis: String,
    pub test_id: String,
    pub status: BranchStatus,
    pub stages: Vec<StageRecord>,
    pub ledger: StageLedger,
    pub artifacts_collected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_ip: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl BranchOutcome {
    /// Outcome for a branch that never got to run (e.g. its task panicked)
    pub fn failed(axis: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            axis: axis.into(),
            test_id: String::new(),
            status: BranchStatus::Failed,
            stages: Vec::new(),
            ledger: StageLedger::new(),
            artifacts_collected: false,
            runner_ip: None,
            error: Some(error.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|r| r.stage == stage)
    }
}

/// Stage records of a branch plus the stage in flight, so an interrupted
/// stage can still be recorded after its future was dropped
#[derive(Debug, Default)]
struct StageTracker {
    records: Vec<StageRecord>,
    in_flight: Option<(Stage, Instant)>,
}

impl StageTracker {
    fn any_failed(&self) -> bool {
        self.records.iter().any(|r| r.status.is_failure())
    }
}

/// Mutable state of one branch while its stages run
#[derive(Debug)]
struct BranchState {
    tracker: StageTracker,
    ledger: StageLedger,
    target: TargetMode,
    runner_ip: Option<Ipv4Addr>,
}

/// Runs one branch end to end
#[derive(Clone)]
pub struct StageSequencer {
    collaborators: Arc<dyn Collaborators>,
    resolver: EnvironmentResolver,
    event_tx: Option<ProgressSender>,
    branch_limit: Option<Duration>,
}

impl StageSequencer {
    pub fn new(collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            collaborators,
            resolver: EnvironmentResolver::new(),
            event_tx: None,
            branch_limit: None,
        }
    }

    pub fn with_resolver(mut self, resolver: EnvironmentResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Override the branch cancellation timeout derived from the budget
    pub fn with_branch_limit(mut self, limit: Duration) -> Self {
        self.branch_limit = Some(limit);
        self
    }

    fn sweep(&self) -> FinalizationSweep {
        let sweep = FinalizationSweep::new(self.collaborators.clone());
        match &self.event_tx {
            Some(tx) => sweep.with_progress(tx.clone()),
            None => sweep,
        }
    }

    /// Run the branch: main sequence, then the sweep. Never panics on stage
    /// failures; a fatal error ends the branch without finalization.
    pub async fn run(&self, plan: BranchPlan) -> BranchOutcome {
        let start = Instant::now();
        self.event_tx.send_event(ExecutionEvent::BranchStarted {
            axis: plan.axis.clone(),
            test_id: plan.test_id.clone(),
        });
        info!(axis = %plan.axis, test_id = %plan.test_id, "branch started");

        let mut state = BranchState {
            tracker: StageTracker::default(),
            ledger: StageLedger::new(),
            target: TargetMode::Local,
            runner_ip: None,
        };

        let outcome = match self.run_branch(&plan, &mut state).await {
            Ok((artifacts_collected, main_failed)) => {
                let status = if !main_failed {
                    BranchStatus::Passed
                } else if state.ledger.all_complete() {
                    BranchStatus::Degraded
                } else {
                    BranchStatus::Failed
                };
                self.outcome(&plan, state, status, artifacts_collected, None, start)
            }
            Err(e) => {
                error!(axis = %plan.axis, error = %e, "branch aborted before finalization");
                self.event_tx
                    .send_event(ExecutionEvent::error(e.to_string(), Some(plan.axis.clone())));
                self.outcome(&plan, state, BranchStatus::Failed, false, Some(e.to_string()), start)
            }
        };

        self.event_tx.send_event(ExecutionEvent::BranchCompleted {
            axis: outcome.axis.clone(),
            status: outcome.status,
            duration: outcome.duration,
        });
        info!(axis = %outcome.axis, status = outcome.status.as_str(), "branch finished");
        outcome
    }

    fn outcome(
        &self,
        plan: &BranchPlan,
        state: BranchState,
        status: BranchStatus,
        artifacts_collected: bool,
        error: Option<String>,
        start: Instant,
    ) -> BranchOutcome {
        BranchOutcome {
            axis: plan.axis.clone(),
            test_id: plan.test_id.clone(),
            status,
            stages: state.tracker.records,
            ledger: state.ledger,
            artifacts_collected,
            runner_ip: state.runner_ip,
            error,
            duration: start.elapsed(),
        }
    }

    /// Returns (artifacts collected, main sequence failed). `Err` only for
    /// fatal errors, which skip finalization.
    async fn run_branch(&self, plan: &BranchPlan, state: &mut BranchState) -> ServiceResult<(bool, bool)> {
        let config = self.resolver.resolve(&plan.params)?;
        let ctx = BranchContext {
            axis: plan.axis.clone(),
            test_id: plan.test_id.clone(),
            workdir: plan.workdir.clone(),
            env: plan.environment(&config),
            config,
        };

        let checkout_ok = match self
            .attempt(&ctx.axis, &mut state.tracker, Stage::Checkout, None, self.collaborators.checkout(&ctx))
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => false,
        };

        let budget = self
            .attempt(&ctx.axis, &mut state.tracker, Stage::ComputeBudget, None, async {
                budget(ctx.config.duration_minutes, ctx.config.backend, &ctx.config.region)
            })
            .await?;

        let mut timed_out = false;
        if checkout_ok {
            let limit = self.branch_limit.unwrap_or_else(|| budget.branch_limit());
            let main = self.provisioned_stages(&ctx, &budget, state);
            if tokio::time::timeout(limit, main).await.is_err() {
                timed_out = true;
                self.interrupted(&ctx.axis, &mut state.tracker, limit);
            }
        } else {
            warn!(axis = %ctx.axis, "checkout failed, skipping to finalization");
            // terminal stages are left to the sweep
            for stage in &Stage::SEQUENCE[2..5] {
                state
                    .tracker
                    .records
                    .push(StageRecord::skipped(*stage, "checkout failed"));
            }
        }

        let main_failed = timed_out || state.tracker.any_failed();
        let build_result = if timed_out {
            BuildResult::Aborted
        } else if main_failed {
            BuildResult::Failure
        } else {
            BuildResult::Success
        };
        let report = self
            .sweep()
            .run(
                &ctx,
                &mut state.ledger,
                state.target,
                &budget,
                build_result,
                &ctx.workdir.join(ARTIFACTS_DIR),
            )
            .await;
        state.tracker.records.extend(report.records);

        Ok((report.artifacts_collected, main_failed))
    }

    /// Runner, test, logs and the terminal stages. Every stage is attempted
    /// regardless of earlier failures.
    async fn provisioned_stages(&self, ctx: &BranchContext, budget: &TimeoutBudget, state: &mut BranchState) {
        let collaborators = self.collaborators.as_ref();
        let axis = ctx.axis.as_str();
        let mut runner_unusable: Option<String> = None;

        if ctx.config.backend.supports_remote_runner() {
            let limit = budget.limit(Allocation::RunnerProvision);
            let created = self
                .attempt(axis, &mut state.tracker, Stage::CreateRunner, Some(limit), collaborators.create_runner(ctx, limit))
                .await;
            match created {
                Ok(ip) => {
                    state.target = TargetMode::Remote(ip);
                    state.runner_ip = Some(ip);
                }
                Err(e) if e.is_fatal() => runner_unusable = Some(e.to_string()),
                Err(e) => {
                    warn!(axis, error = %e, "runner unavailable, running locally");
                    self.event_tx.send_event(ExecutionEvent::warning(
                        "runner unavailable, running locally",
                        Some(axis.to_string()),
                    ));
                }
            }
        } else {
            state.tracker.records.push(StageRecord::skipped(
                Stage::CreateRunner,
                format!("backend {} runs without a runner", ctx.config.backend),
            ));
        }

        let target = state.target;
        match runner_unusable {
            Some(reason) => {
                let record = StageRecord::failed(
                    Stage::RunTest,
                    StageStatus::Failed,
                    Duration::ZERO,
                    format!("runner address unavailable: {}", reason),
                );
                self.record(axis, &mut state.tracker, record);
            }
            None => {
                let limit = budget.limit(Allocation::TestRun);
                let _ = self
                    .attempt(axis, &mut state.tracker, Stage::RunTest, Some(limit), collaborators.run_test(ctx, target, limit))
                    .await;
            }
        }

        let limit = budget.limit(Allocation::LogCollect);
        let _ = self
            .attempt(axis, &mut state.tracker, Stage::CollectLogs, Some(limit), collaborators.collect_logs(ctx, target, limit))
            .await;

        let build_result = if state.tracker.any_failed() {
            BuildResult::Failure
        } else {
            BuildResult::Success
        };
        for stage in TerminalStage::ORDER {
            let body = run_terminal_stage(collaborators, ctx, &mut state.ledger, stage, target, budget, build_result);
            let _ = self
                .attempt(axis, &mut state.tracker, Stage::from(stage), None, body)
                .await;
        }
    }

    /// Run one stage, bounded by `limit`, recording its outcome
    async fn attempt<T, F>(
        &self,
        axis: &str,
        tracker: &mut StageTracker,
        stage: Stage,
        limit: Option<Duration>,
        body: F,
    ) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        let started = Instant::now();
        tracker.in_flight = Some((stage, started));
        self.event_tx.send_event(ExecutionEvent::stage_started(axis, stage));
        info!(axis, stage = %stage, "stage started");

        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, body).await.unwrap_or_else(|_| {
                Err(ServiceError::Timeout {
                    stage: stage.as_str().to_string(),
                    limit,
                })
            }),
            None => body.await,
        };
        tracker.in_flight = None;

        self.record(axis, tracker, StageRecord::from_result(stage, started.elapsed(), &result));
        result
    }

    fn record(&self, axis: &str, tracker: &mut StageTracker, record: StageRecord) {
        match &record.error {
            Some(error) if record.status.is_failure() => {
                warn!(axis, stage = %record.stage, status = ?record.status, error = %error, "stage failed")
            }
            _ => info!(axis, stage = %record.stage, status = ?record.status, "stage finished"),
        }
        self.event_tx.send_event(ExecutionEvent::stage_completed(
            axis,
            record.stage,
            record.status,
            record.duration,
            record.error.clone(),
        ));
        tracker.records.push(record);
    }

    /// Record the stage cut short by the branch limit
    fn interrupted(&self, axis: &str, tracker: &mut StageTracker, limit: Duration) {
        error!(axis, limit_minutes = limit.as_secs() / 60, "branch exceeded its time limit");
        if let Some((stage, started)) = tracker.in_flight.take() {
            let record = StageRecord::failed(
                stage,
                StageStatus::TimedOut,
                started.elapsed(),
                "cancelled by the branch time limit",
            );
            self.record(axis, tracker, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::fakes::{ScriptedCollaborators, FAKE_RUNNER};
    use crate::execution::progress_channel;

    fn params(backend: &str) -> RawParams {
        RawParams {
            backend: Some(backend.to_string()),
            ami_id: Some("ami-123".to_string()),
            duration_minutes: Some(180),
            email_recipients: Some("qa@scylladb.com".to_string()),
            ..RawParams::default()
        }
    }

    fn plan(axis: &str, backend: &str) -> BranchPlan {
        BranchPlan::new(axis, params(backend), Path::new("/tmp/hydra-tests"))
            .with_axis_variable(DEFAULT_AXIS_VARIABLE)
    }

    fn sequencer(fake: &Arc<ScriptedCollaborators>) -> StageSequencer {
        StageSequencer::new(fake.clone())
    }

    #[test]
    fn test_workspace_names() {
        assert_eq!(workspace_name("i4i.2xlarge"), "i4i.2xlarge");
        assert_eq!(workspace_name("n2-highmem-16 ssd"), "n2-highmem-16_ssd");
        assert_eq!(workspace_name("../etc"), "_etc");
        assert_eq!(workspace_name(""), "default");
    }

    #[test]
    fn test_branch_environment() {
        let plan = plan("i4i.large", "aws");
        let config = EnvironmentResolver::new().resolve(&plan.params).unwrap();
        let env = plan.environment(&config);

        assert_eq!(env.get("SCT_INSTANCE_TYPE_DB").map(String::as_str), Some("i4i.large"));
        assert_eq!(env.get(TEST_ID_VARIABLE), Some(&plan.test_id));
        assert_eq!(env.get("SCT_AMI_ID_DB_SCYLLA").map(String::as_str), Some("ami-123"));
        assert_eq!(plan.workdir, PathBuf::from("/tmp/hydra-tests/i4i.large"));
    }

    #[tokio::test]
    async fn test_happy_path_runs_on_runner() {
        let fake = Arc::new(ScriptedCollaborators::new());
        let outcome = sequencer(&fake).run(plan("a", "aws")).await;

        assert_eq!(outcome.status, BranchStatus::Passed);
        assert_eq!(outcome.runner_ip, Some(FAKE_RUNNER));
        assert!(outcome.ledger.all_complete());
        assert!(outcome.artifacts_collected);
        assert_eq!(
            fake.names(),
            vec!["checkout", "create_runner", "run_test", "collect_logs", "clean_resources", "send_email", "copy_artifacts"]
        );
        let run_test = fake.calls().into_iter().find(|c| c.name == "run_test").unwrap();
        assert_eq!(run_test.target, Some(TargetMode::Remote(FAKE_RUNNER)));
        let email = fake.calls().into_iter().find(|c| c.name == "send_email").unwrap();
        assert_eq!(email.build_result, Some(BuildResult::Success));
    }

    #[tokio::test]
    async fn test_failed_test_is_degraded() {
        let fake = Arc::new(ScriptedCollaborators::new().fail(Stage::RunTest));
        let outcome = sequencer(&fake).run(plan("a", "aws")).await;

        assert_eq!(outcome.status, BranchStatus::Degraded);
        assert_eq!(outcome.stage(Stage::RunTest).unwrap().status, StageStatus::Failed);
        assert_eq!(outcome.stage(Stage::CollectLogs).unwrap().status, StageStatus::Succeeded);
        assert!(outcome.ledger.is_complete(TerminalStage::CleanResources));
        assert!(outcome.ledger.is_complete(TerminalStage::SendEmail));
        // terminal stages ran in the main sequence, the sweep only archived
        assert_eq!(fake.count("clean_resources"), 1);
        assert_eq!(fake.count("send_email"), 1);
        let email = fake.calls().into_iter().find(|c| c.name == "send_email").unwrap();
        assert_eq!(email.build_result, Some(BuildResult::Failure));
    }

    #[tokio::test]
    async fn test_clean_resources_always_marked() {
        for failing in [
            Stage::Checkout,
            Stage::CreateRunner,
            Stage::RunTest,
            Stage::CollectLogs,
            Stage::CleanResources,
            Stage::SendEmail,
        ] {
            let fake = Arc::new(ScriptedCollaborators::new().fail(failing));
            let outcome = sequencer(&fake).run(plan("a", "aws")).await;

            assert!(
                outcome.ledger.is_complete(TerminalStage::CleanResources),
                "clean_resources missing when {} fails",
                failing
            );
            assert_eq!(outcome.status, BranchStatus::Degraded, "when {} fails", failing);
            assert_eq!(fake.count("clean_resources"), 1, "when {} fails", failing);
        }
    }

    #[tokio::test]
    async fn test_checkout_failure_skips_to_sweep() {
        let fake = Arc::new(ScriptedCollaborators::new().fail(Stage::Checkout));
        let outcome = sequencer(&fake).run(plan("a", "aws")).await;

        assert_eq!(
            fake.names(),
            vec!["checkout", "copy_artifacts", "clean_resources", "send_email"]
        );
        assert_eq!(outcome.stage(Stage::RunTest).unwrap().status, StageStatus::Skipped);
        assert_eq!(outcome.stage(Stage::ComputeBudget).unwrap().status, StageStatus::Succeeded);
        // the sweep ran the terminal stages, so their records say so
        for stage in [Stage::CleanResources, Stage::SendEmail] {
            let records: Vec<_> = outcome.stages.iter().filter(|r| r.stage == stage).collect();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].status, StageStatus::Succeeded);
        }
        assert_eq!(outcome.status, BranchStatus::Degraded);
    }

    #[tokio::test]
    async fn test_runner_failure_falls_back_to_local() {
        let fake = Arc::new(ScriptedCollaborators::new().fail(Stage::CreateRunner));
        let outcome = sequencer(&fake).run(plan("a", "aws")).await;

        assert_eq!(outcome.status, BranchStatus::Degraded);
        assert_eq!(outcome.runner_ip, None);
        let run_test = fake.calls().into_iter().find(|c| c.name == "run_test").unwrap();
        assert_eq!(run_test.target, Some(TargetMode::Local));
    }

    #[tokio::test]
    async fn test_providerless_backend_skips_runner() {
        let fake = Arc::new(ScriptedCollaborators::new());
        let outcome = sequencer(&fake).run(plan("a", "docker")).await;

        assert_eq!(outcome.status, BranchStatus::Passed);
        assert_eq!(outcome.stage(Stage::CreateRunner).unwrap().status, StageStatus::Skipped);
        assert_eq!(fake.count("create_runner"), 0);
    }

    #[tokio::test]
    async fn test_configuration_error_is_fatal() {
        let fake = Arc::new(ScriptedCollaborators::new());
        let mut plan = plan("a", "aws");
        plan.params.ami_id = None;

        let outcome = sequencer(&fake).run(plan).await;

        assert_eq!(outcome.status, BranchStatus::Failed);
        assert!(outcome.error.unwrap().contains("no artifact source specified"));
        assert!(fake.calls().is_empty());
        assert!(!outcome.ledger.is_complete(TerminalStage::CleanResources));
    }

    #[tokio::test]
    async fn test_budget_error_is_fatal() {
        let fake = Arc::new(ScriptedCollaborators::new());
        let mut plan = plan("a", "aws");
        plan.params.duration_minutes = Some(0);

        let outcome = sequencer(&fake).run(plan).await;

        assert_eq!(outcome.status, BranchStatus::Failed);
        assert_eq!(fake.names(), vec!["checkout"]);
        assert_eq!(outcome.stage(Stage::ComputeBudget).unwrap().status, StageStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_is_a_stage_failure() {
        // 180 minute test gets a 240 minute allocation
        let fake = Arc::new(ScriptedCollaborators::new().delay(Stage::RunTest, Duration::from_secs(300 * 60)));
        let outcome = sequencer(&fake).run(plan("a", "aws")).await;

        assert_eq!(outcome.stage(Stage::RunTest).unwrap().status, StageStatus::TimedOut);
        assert_eq!(outcome.stage(Stage::CollectLogs).unwrap().status, StageStatus::Succeeded);
        assert_eq!(outcome.status, BranchStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_timeout_cancels_and_sweep_finishes() {
        let fake = Arc::new(ScriptedCollaborators::new().delay(Stage::CollectLogs, Duration::from_secs(60 * 60)));
        let outcome = sequencer(&fake)
            .with_branch_limit(Duration::from_secs(30 * 60))
            .run(plan("a", "aws"))
            .await;

        assert_eq!(outcome.stage(Stage::CollectLogs).unwrap().status, StageStatus::TimedOut);
        assert!(outcome.ledger.all_complete());
        assert_eq!(outcome.status, BranchStatus::Degraded);
        // terminal stages come from the sweep after cancellation
        assert_eq!(
            fake.names(),
            vec!["checkout", "create_runner", "run_test", "collect_logs", "copy_artifacts", "clean_resources", "send_email"]
        );
        let email = fake.calls().into_iter().find(|c| c.name == "send_email").unwrap();
        assert_eq!(email.build_result, Some(BuildResult::Aborted));
        assert_eq!(outcome.stage(Stage::CleanResources).unwrap().status, StageStatus::Succeeded);
        assert_eq!(outcome.stage(Stage::SendEmail).unwrap().status, StageStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (tx, mut rx) = progress_channel();
        let fake = Arc::new(ScriptedCollaborators::new());
        sequencer(&fake).with_progress(tx).run(plan("a", "aws")).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ExecutionEvent::BranchStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::BranchCompleted {
                status: BranchStatus::Passed,
                ..
            })
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::ArtifactsArchived { success: true, .. })));
    }
}
