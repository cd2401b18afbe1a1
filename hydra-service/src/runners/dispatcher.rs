// Execution Dispatcher
// Runs a tool command inside the pinned execution image, locally or on a runner

use crate::config::models::Backend;
use crate::config::HydraSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::runners::remote::{CredentialSources, RemoteSession, SshAgent};
use crate::runners::{
    CommandExecutor, CommandOutput, CommandSpec, ContainerInvocation, EnvForwarder, RemoteTarget,
    TargetMode,
};

use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// External programs that must be on PATH for a given kind of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredTools {
    tools: Vec<&'static str>,
    search_path: Option<OsString>,
}

impl RequiredTools {
    pub fn new(tools: &[&'static str]) -> Self {
        Self {
            tools: tools.to_vec(),
            search_path: None,
        }
    }

    /// Look the tools up in `path` instead of `PATH`
    pub fn in_path(mut self, path: Option<OsString>) -> Self {
        self.search_path = path;
        self
    }

    /// Tools needed to dispatch to `target`
    pub fn for_target(target: TargetMode) -> Self {
        match target {
            TargetMode::Local => Self::new(&["docker"]),
            TargetMode::Remote(_) => Self::new(&["ssh", "ssh-agent", "ssh-add", "rsync"]),
        }
    }

    pub fn missing(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .copied()
            .filter(|tool| match &self.search_path {
                Some(path) => which::which_in(tool, Some(path), ".").is_err(),
                None => which::which(tool).is_err(),
            })
            .collect()
    }

    /// Fail with a configuration error naming every missing tool
    pub fn check(&self) -> ServiceResult<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::config(format!(
                "required tools not found on PATH: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Wraps commands in the execution image and sends them to a target
#[derive(Clone)]
pub struct Dispatcher {
    settings: HydraSettings,
    executor: Arc<dyn CommandExecutor>,
    forwarder: EnvForwarder,
    workspace: PathBuf,
    backend: Option<Backend>,
    tool_path: Option<OsString>,
}

impl Dispatcher {
    pub fn new(
        settings: HydraSettings,
        forwarder: EnvForwarder,
        workspace: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let backend = forwarder
            .get("SCT_CLUSTER_BACKEND")
            .and_then(|b| b.parse::<Backend>().ok());
        Self {
            settings,
            executor,
            forwarder,
            workspace: workspace.into(),
            backend,
            tool_path: None,
        }
    }

    /// Search path used when checking for required tools
    pub fn with_tool_path(mut self, path: impl Into<OsString>) -> Self {
        self.tool_path = Some(path.into());
        self
    }

    /// Fail unless every tool is installed. Checked in dry-run mode too.
    pub fn require(&self, tools: RequiredTools) -> ServiceResult<()> {
        tools.in_path(self.tool_path.clone()).check()
    }

    /// Backend deciding which provider credentials are synced to runners
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Same dispatcher rooted at another workspace
    pub fn for_workspace(&self, workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..self.clone()
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn settings(&self) -> &HydraSettings {
        &self.settings
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// Command invoking the configured entrypoint with `args`
    pub fn tool_command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.settings.entrypoint.clone()).args(args)
    }

    /// Run `command` inside the execution image on `target`. A non-zero exit
    /// of the command is returned as `ServiceError::Command` carrying its code.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn dispatch(
        &self,
        command: &CommandSpec,
        target: TargetMode,
        timeout: Option<Duration>,
    ) -> ServiceResult<CommandOutput> {
        self.require(RequiredTools::for_target(target))?;
        match target {
            TargetMode::Local => self.dispatch_local(command, timeout).await,
            TargetMode::Remote(host) => self.dispatch_remote(command, host, timeout).await,
        }
    }

    fn invocation(&self, command: &CommandSpec, workspace: &Path) -> ContainerInvocation {
        ContainerInvocation::new(self.settings.image_ref(), workspace)
            .with_env(self.forwarder.merged(&command.env))
            .with_volume(format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET))
            .with_command(command.argv())
    }

    async fn dispatch_local(
        &self,
        command: &CommandSpec,
        timeout: Option<Duration>,
    ) -> ServiceResult<CommandOutput> {
        info!(command = %command.command_line(), "dispatching to local container");
        let spec = self
            .invocation(command, &self.workspace)
            .to_command()
            .current_dir(&self.workspace);
        self.executor.run_checked(&spec, timeout).await
    }

    async fn dispatch_remote(
        &self,
        command: &CommandSpec,
        host: Ipv4Addr,
        timeout: Option<Duration>,
    ) -> ServiceResult<CommandOutput> {
        info!(command = %command.command_line(), %host, "dispatching to runner");
        let target = self.remote_target(host);

        let agent = SshAgent::start(self.executor.clone(), &self.settings.ssh_keys).await?;
        let result = self.remote_steps(&agent, &target, command, timeout).await;
        agent.stop().await;
        result
    }

    /// Pull `remote` (relative to the runner workspace) into `local`
    pub async fn fetch_from_runner(&self, host: Ipv4Addr, remote: &str, local: &Path) -> ServiceResult<()> {
        self.require(RequiredTools::for_target(TargetMode::Remote(host)))?;
        let target = self.remote_target(host);

        let agent = SshAgent::start(self.executor.clone(), &self.settings.ssh_keys).await?;
        let spec = target
            .pull(target.workspace.join(remote), local)
            .envs(agent.env());
        let result = self.executor.run_checked(&spec, None).await.map(|_| ());
        agent.stop().await;
        result
    }

    fn remote_target(&self, host: Ipv4Addr) -> RemoteTarget {
        RemoteTarget::new(
            host,
            self.settings.remote_user.clone(),
            self.settings.remote_workspace.clone(),
        )
    }

    async fn remote_steps(
        &self,
        agent: &SshAgent,
        target: &RemoteTarget,
        command: &CommandSpec,
        timeout: Option<Duration>,
    ) -> ServiceResult<CommandOutput> {
        let session = RemoteSession {
            executor: self.executor.as_ref(),
            target,
            agent,
        };

        session.sync_workspace(&self.workspace).await?;
        session
            .sync_credentials(
                &self.credential_sources(),
                self.backend.and_then(|b| b.cloud_provider()),
                self.forwarder.has_aws_credentials(),
            )
            .await?;
        let group_ids = session.group_ids().await?;

        let invocation = self
            .invocation(command, &target.workspace)
            .with_group_ids(group_ids);
        let spec = session.remote_docker(&invocation);
        self.executor.run_checked(&spec, timeout).await
    }

    fn credential_sources(&self) -> CredentialSources {
        CredentialSources {
            aws_dir: self.settings.aws_credentials_dir.clone(),
            gce_file: self.settings.gce_credentials_file.clone(),
            azure_dir: self.settings.azure_credentials_dir.clone(),
        }
    }
}

/// Directory of stand-in executables for every tool a run may require
#[cfg(test)]
pub(crate) fn fake_toolbox(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    for tool in ["docker", "ssh", "ssh-agent", "ssh-add", "rsync", "git", "cp"] {
        let path = bin.join(tool);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    bin
}
