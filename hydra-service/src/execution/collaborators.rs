// Collaborators
// External steps the sequencer drives, and their implementation on top of the dispatcher

use crate::budget::RunnerSizing;
use crate::config::models::RunConfiguration;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::state::RunnerIpFile;
use crate::runners::{CommandSpec, Dispatcher, RequiredTools, TargetMode};

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Address recorded for runners "provisioned" in dry-run mode (TEST-NET-1)
pub const DRY_RUN_RUNNER_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);

/// Directory, relative to a workspace, where the test tool leaves its logs
pub const RESULTS_DIR: &str = "latest/";

/// Everything a collaborator needs to know about its branch
#[derive(Debug, Clone, PartialEq)]
pub struct BranchContext {
    pub axis: String,
    pub test_id: String,
    pub workdir: PathBuf,
    pub config: RunConfiguration,
    /// Variables exported to every tool command of this branch
    pub env: BTreeMap<String, String>,
}

/// Result reported in the notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildResult {
    Success,
    Failure,
    Aborted,
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Failure => "FAILURE",
            BuildResult::Aborted => "ABORTED",
        }
    }
}

/// Opaque external steps. Only their exit status matters to the sequencer,
/// plus the runner address from `create_runner`.
#[async_trait::async_trait]
pub trait Collaborators: Send + Sync {
    /// Produce the branch workspace
    async fn checkout(&self, ctx: &BranchContext) -> ServiceResult<()>;

    async fn create_runner(&self, ctx: &BranchContext, timeout: Duration) -> ServiceResult<Ipv4Addr>;

    async fn run_test(&self, ctx: &BranchContext, target: TargetMode, timeout: Duration) -> ServiceResult<()>;

    async fn collect_logs(&self, ctx: &BranchContext, target: TargetMode, timeout: Duration) -> ServiceResult<()>;

    async fn cleanup_resources(
        &self,
        ctx: &BranchContext,
        target: TargetMode,
        timeout: Duration,
    ) -> ServiceResult<()>;

    async fn send_email(&self, ctx: &BranchContext, result: BuildResult, timeout: Duration) -> ServiceResult<()>;

    /// Retrieve the test tool's results into `destination`
    async fn copy_artifacts(&self, ctx: &BranchContext, target: TargetMode, destination: &Path) -> ServiceResult<()>;
}

/// Collaborators that run the test tool through the dispatcher
pub struct HydraCollaborators {
    dispatcher: Dispatcher,
    source: Option<String>,
    git_ref: Option<String>,
}

impl HydraCollaborators {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            source: None,
            git_ref: None,
        }
    }

    /// Repository cloned into each branch workspace
    pub fn with_source(mut self, source: impl Into<String>, git_ref: Option<String>) -> Self {
        self.source = Some(source.into());
        self.git_ref = git_ref;
        self
    }

    fn simulated(&self) -> bool {
        self.dispatcher.executor().is_simulated()
    }

    fn dispatcher_for(&self, ctx: &BranchContext) -> Dispatcher {
        self.dispatcher
            .for_workspace(&ctx.workdir)
            .with_backend(ctx.config.backend)
    }

    /// Tool invocation carrying the branch environment
    fn tool<I, S>(&self, ctx: &BranchContext, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatcher
            .tool_command(args)
            .envs(ctx.env.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    async fn dispatch(
        &self,
        ctx: &BranchContext,
        command: CommandSpec,
        target: TargetMode,
        timeout: Duration,
    ) -> ServiceResult<()> {
        self.dispatcher_for(ctx)
            .dispatch(&command, target, Some(timeout))
            .await
            .map(|_| ())
    }

    async fn run_on_host(&self, spec: CommandSpec) -> ServiceResult<()> {
        self.dispatcher
            .executor()
            .run_checked(&spec, None)
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl Collaborators for HydraCollaborators {
    async fn checkout(&self, ctx: &BranchContext) -> ServiceResult<()> {
        let Some(source) = &self.source else {
            if !self.simulated() {
                std::fs::create_dir_all(&ctx.workdir)?;
            }
            debug!(axis = %ctx.axis, workdir = %ctx.workdir.display(), "using workspace without checkout");
            return Ok(());
        };

        self.dispatcher.require(RequiredTools::new(&["git"]))?;
        if !self.simulated() {
            if let Some(parent) = ctx.workdir.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut clone = CommandSpec::new("git").args(["clone", "--quiet"]);
        if let Some(git_ref) = &self.git_ref {
            clone = clone.args(["--branch", git_ref.as_str()]);
        }
        let clone = clone
            .arg(source.clone())
            .arg(ctx.workdir.display().to_string());
        self.run_on_host(clone).await
    }

    async fn create_runner(&self, ctx: &BranchContext, timeout: Duration) -> ServiceResult<Ipv4Addr> {
        let config = &ctx.config;
        let provider = config.backend.cloud_provider().ok_or_else(|| {
            ServiceError::config(format!("backend {} cannot provision a runner", config.backend))
        })?;
        let sizing = RunnerSizing::for_duration(config.duration_minutes.max(0) as u64);

        let command = self.tool(
            ctx,
            [
                "create-runner-instance".to_string(),
                "--cloud-provider".to_string(),
                provider.as_str().to_string(),
                "--region".to_string(),
                config.primary_region().to_string(),
                "--availability-zone".to_string(),
                config.availability_zone.clone(),
                "--test-id".to_string(),
                ctx.test_id.clone(),
                "--duration".to_string(),
                config.duration_minutes.to_string(),
                "--instance-class".to_string(),
                sizing.class.as_str().to_string(),
                "--root-disk-size-gb".to_string(),
                sizing.root_disk_gb.to_string(),
                "--keep-hours".to_string(),
                sizing.keep_hours.to_string(),
            ],
        );
        self.dispatch(ctx, command, TargetMode::Local, timeout).await?;

        let ip_file = RunnerIpFile::in_workspace(&ctx.workdir, &self.dispatcher.settings().runner_ip_file);
        if self.simulated() {
            ip_file.write(DRY_RUN_RUNNER_ADDRESS)?;
        }
        let address = ip_file.read()?;
        info!(axis = %ctx.axis, runner = %address, class = sizing.class.as_str(), "runner ready");
        Ok(address)
    }

    async fn run_test(&self, ctx: &BranchContext, target: TargetMode, timeout: Duration) -> ServiceResult<()> {
        let mut args = vec![
            "run-test".to_string(),
            ctx.config.test_name.clone(),
            "--backend".to_string(),
            ctx.config.backend.as_str().to_string(),
        ];
        if let Some(test_config) = &ctx.config.test_config {
            args.push("--config".to_string());
            args.push(test_config.clone());
        }
        let command = self.tool(ctx, args);
        self.dispatch(ctx, command, target, timeout).await
    }

    async fn collect_logs(&self, ctx: &BranchContext, target: TargetMode, timeout: Duration) -> ServiceResult<()> {
        let command = self.tool(
            ctx,
            [
                "collect-logs",
                "--backend",
                ctx.config.backend.as_str(),
                "--test-id",
                ctx.test_id.as_str(),
            ],
        );
        self.dispatch(ctx, command, target, timeout).await
    }

    async fn cleanup_resources(
        &self,
        ctx: &BranchContext,
        target: TargetMode,
        timeout: Duration,
    ) -> ServiceResult<()> {
        let command = self.tool(
            ctx,
            ["clean-resources", "--post-behavior", "--test-id", ctx.test_id.as_str()],
        );
        self.dispatch(ctx, command, target, timeout).await
    }

    async fn send_email(&self, ctx: &BranchContext, result: BuildResult, timeout: Duration) -> ServiceResult<()> {
        if ctx.config.email_recipients.is_empty() {
            info!(axis = %ctx.axis, "no email recipients configured, nothing to send");
            return Ok(());
        }
        let recipients = ctx.config.email_recipients.join(",");
        let command = self.tool(
            ctx,
            [
                "send-email",
                "--test-status",
                result.as_str(),
                "--test-id",
                ctx.test_id.as_str(),
                "--email-recipients",
                recipients.as_str(),
            ],
        );
        self.dispatch(ctx, command, TargetMode::Local, timeout).await
    }

    async fn copy_artifacts(&self, ctx: &BranchContext, target: TargetMode, destination: &Path) -> ServiceResult<()> {
        if !self.simulated() {
            std::fs::create_dir_all(destination)?;
        }
        match target {
            TargetMode::Remote(host) => {
                self.dispatcher_for(ctx)
                    .fetch_from_runner(host, RESULTS_DIR, destination)
                    .await
            }
            TargetMode::Local => {
                self.dispatcher.require(RequiredTools::new(&["cp"]))?;
                let results = ctx.workdir.join(RESULTS_DIR);
                if !results.is_dir() {
                    if !self.simulated() {
                        return Err(ServiceError::command(
                            format!("cp -a {}", results.display()),
                            None,
                            "no results directory in workspace",
                        ));
                    }
                    warn!(axis = %ctx.axis, results = %results.display(), "no results directory yet, a real run would fail here");
                }
                let copy = CommandSpec::new("cp")
                    .arg("-a")
                    .arg(format!("{}.", results.display()))
                    .arg(destination.display().to_string());
                self.run_on_host(copy).await
            }
        }
    }
}
