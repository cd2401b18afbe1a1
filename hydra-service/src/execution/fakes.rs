// Scripted collaborators for sequencer, sweep and fan-out tests

use crate::config::models::{ArtifactSource, Backend, DisposalPolicy, ProvisionType, RunConfiguration};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::collaborators::{BranchContext, BuildResult, Collaborators};
use crate::execution::stages::Stage;
use crate::runners::TargetMode;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) const FAKE_RUNNER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

/// One collaborator invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub name: &'static str,
    pub axis: String,
    pub target: Option<TargetMode>,
    pub build_result: Option<BuildResult>,
}

#[derive(Default)]
pub(crate) struct ScriptedCollaborators {
    failures: HashSet<Stage>,
    delays: HashMap<Stage, Duration>,
    failing_axes: HashSet<String>,
    artifacts_fail: bool,
    artifacts_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, stage: Stage) -> Self {
        self.failures.insert(stage);
        self
    }

    pub fn delay(mut self, stage: Stage, delay: Duration) -> Self {
        self.delays.insert(stage, delay);
        self
    }

    /// Every scripted failure only applies to this axis
    pub fn only_for_axis(mut self, axis: &str) -> Self {
        self.failing_axes.insert(axis.to_string());
        self
    }

    pub fn fail_artifacts(mut self) -> Self {
        self.artifacts_fail = true;
        self
    }

    pub fn delay_artifacts(mut self, delay: Duration) -> Self {
        self.artifacts_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.name).collect()
    }

    pub fn names_for(&self, axis: &str) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| c.axis == axis)
            .map(|c| c.name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name == name).count()
    }

    fn fails(&self, stage: Stage, axis: &str) -> bool {
        self.failures.contains(&stage)
            && (self.failing_axes.is_empty() || self.failing_axes.contains(axis))
    }

    async fn step(
        &self,
        stage: Stage,
        ctx: &BranchContext,
        target: Option<TargetMode>,
        build_result: Option<BuildResult>,
    ) -> ServiceResult<()> {
        self.calls.lock().unwrap().push(Call {
            name: stage.as_str(),
            axis: ctx.axis.clone(),
            target,
            build_result,
        });
        if let Some(delay) = self.delays.get(&stage) {
            tokio::time::sleep(*delay).await;
        }
        if self.fails(stage, &ctx.axis) {
            return Err(ServiceError::command(
                format!("./sct.py {}", stage.as_str().replace('_', "-")),
                Some(1),
                "scripted failure",
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Collaborators for ScriptedCollaborators {
    async fn checkout(&self, ctx: &BranchContext) -> ServiceResult<()> {
        self.step(Stage::Checkout, ctx, None, None).await
    }

    async fn create_runner(&self, ctx: &BranchContext, _timeout: Duration) -> ServiceResult<Ipv4Addr> {
        self.step(Stage::CreateRunner, ctx, None, None).await?;
        Ok(FAKE_RUNNER)
    }

    async fn run_test(&self, ctx: &BranchContext, target: TargetMode, _timeout: Duration) -> ServiceResult<()> {
        self.step(Stage::RunTest, ctx, Some(target), None).await
    }

    async fn collect_logs(&self, ctx: &BranchContext, target: TargetMode, _timeout: Duration) -> ServiceResult<()> {
        self.step(Stage::CollectLogs, ctx, Some(target), None).await
    }

    async fn cleanup_resources(
        &self,
        ctx: &BranchContext,
        target: TargetMode,
        _timeout: Duration,
    ) -> ServiceResult<()> {
        self.step(Stage::CleanResources, ctx, Some(target), None).await
    }

    async fn send_email(&self, ctx: &BranchContext, result: BuildResult, _timeout: Duration) -> ServiceResult<()> {
        self.step(Stage::SendEmail, ctx, None, Some(result)).await
    }

    async fn copy_artifacts(&self, ctx: &BranchContext, target: TargetMode, _destination: &Path) -> ServiceResult<()> {
        self.calls.lock().unwrap().push(Call {
            name: "copy_artifacts",
            axis: ctx.axis.clone(),
            target: Some(target),
            build_result: None,
        });
        if let Some(delay) = self.artifacts_delay {
            tokio::time::sleep(delay).await;
        }
        if self.artifacts_fail && (self.failing_axes.is_empty() || self.failing_axes.contains(&ctx.axis)) {
            return Err(ServiceError::command("rsync latest/", Some(23), "scripted failure"));
        }
        Ok(())
    }
}

/// A resolved branch context with an AWS configuration
pub(crate) fn branch_context(axis: &str) -> BranchContext {
    BranchContext {
        axis: axis.to_string(),
        test_id: format!("test-{}", axis),
        workdir: PathBuf::from("/tmp/hydra-tests").join(axis),
        config: RunConfiguration {
            backend: Backend::Aws,
            region: "eu-west-1".to_string(),
            availability_zone: "a".to_string(),
            artifact_source: ArtifactSource::AmiId {
                ami_id: "ami-123".to_string(),
            },
            disposal: DisposalPolicy::default(),
            provision_type: ProvisionType::default(),
            test_name: "longevity_test.LongevityTest.test_custom_time".to_string(),
            test_config: None,
            duration_minutes: 180,
            email_recipients: vec!["qa@scylladb.com".to_string()],
            env_overlay: BTreeMap::new(),
        },
        env: BTreeMap::new(),
    }
}
