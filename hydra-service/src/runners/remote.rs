// Remote Runner Session
// Address validation, scoped ssh-agent, workspace/credential sync and remote container runs

use crate::config::models::CloudProvider;
use crate::error::{ServiceError, ServiceResult};
use crate::runners::{shell_quote, CommandExecutor, CommandSpec, ContainerInvocation, TargetMode};

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options shared by every ssh connection to a runner
pub const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "ServerAliveInterval=60",
];

/// Accept only a well-formed dotted-quad IPv4 address
pub fn validate_runner_address(address: &str) -> ServiceResult<Ipv4Addr> {
    Ipv4Addr::from_str(address.trim()).map_err(|_| ServiceError::NetworkValidation {
        address: address.to_string(),
    })
}

impl TargetMode {
    /// Remote target from an operator-supplied address
    pub fn remote(address: &str) -> ServiceResult<Self> {
        validate_runner_address(address).map(TargetMode::Remote)
    }
}

/// A provisioned runner and the layout used on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: Ipv4Addr,
    pub user: String,
    pub workspace: PathBuf,
}

impl RemoteTarget {
    pub fn new(host: Ipv4Addr, user: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            host,
            user: user.into(),
            workspace: workspace.into(),
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:path`
    pub fn remote_path(&self, path: impl AsRef<Path>) -> String {
        format!("{}:{}", self.destination(), path.as_ref().display())
    }

    /// ssh invocation running `remote_command` (already shell-quoted) on the runner
    pub fn ssh(&self, remote_command: impl Into<String>) -> CommandSpec {
        CommandSpec::new("ssh")
            .args(SSH_OPTIONS)
            .arg(self.destination())
            .arg(remote_command)
    }

    /// rsync from a local path to a path on the runner
    pub fn push(&self, local: impl AsRef<Path>, remote: impl AsRef<Path>) -> CommandSpec {
        CommandSpec::new("rsync")
            .args(["-a", "-e"])
            .arg(ssh_transport())
            .arg(local.as_ref().display().to_string())
            .arg(self.remote_path(remote))
    }

    /// rsync from the runner to a local path
    pub fn pull(&self, remote: impl AsRef<Path>, local: impl AsRef<Path>) -> CommandSpec {
        CommandSpec::new("rsync")
            .args(["-a", "-e"])
            .arg(ssh_transport())
            .arg(self.remote_path(remote))
            .arg(local.as_ref().display().to_string())
    }
}

fn ssh_transport() -> String {
    std::iter::once("ssh")
        .chain(SSH_OPTIONS.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Directory argument for rsync that copies contents, not the directory itself
fn contents_of(path: &Path) -> String {
    let mut rendered = path.display().to_string();
    if !rendered.ends_with('/') {
        rendered.push('/');
    }
    rendered
}

/// A short-lived ssh-agent. Released with [`SshAgent::stop`]; an agent
/// dropped without being stopped is killed from a background task.
pub struct SshAgent {
    socket: String,
    pid: String,
    released: bool,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for SshAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshAgent")
            .field("socket", &self.socket)
            .field("pid", &self.pid)
            .field("released", &self.released)
            .finish()
    }
}

impl SshAgent {
    /// Start an agent and load the deployment keys into it
    pub async fn start(executor: Arc<dyn CommandExecutor>, keys: &[PathBuf]) -> ServiceResult<Self> {
        let spec = CommandSpec::new("ssh-agent").arg("-s");
        let output = executor.run_checked(&spec, None).await?;

        let (socket, pid) = if executor.is_simulated() {
            ("/tmp/hydra-dry-run/agent.sock".to_string(), "0".to_string())
        } else {
            Self::parse(&output.stdout)?
        };
        let mut agent = SshAgent {
            socket,
            pid,
            released: false,
            executor,
        };
        debug!(pid = %agent.pid, "ssh-agent started");

        for key in keys {
            let add = CommandSpec::new("ssh-add")
                .arg(key.display().to_string())
                .envs(agent.env());
            let added = agent.executor.run_checked(&add, None).await;
            if let Err(e) = added {
                agent.release().await;
                return Err(e);
            }
        }
        Ok(agent)
    }

    /// Socket and pid from `ssh-agent -s` output
    fn parse(stdout: &str) -> ServiceResult<(String, String)> {
        let value_of = |name: &str| {
            stdout.split([';', '\n']).find_map(|part| {
                part.trim()
                    .strip_prefix(name)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(|v| v.trim().to_string())
            })
        };
        match (value_of("SSH_AUTH_SOCK"), value_of("SSH_AGENT_PID")) {
            (Some(socket), Some(pid)) => Ok((socket, pid)),
            _ => Err(ServiceError::command(
                "ssh-agent -s",
                Some(0),
                format!("unexpected ssh-agent output: {}", stdout.trim()),
            )),
        }
    }

    /// Variables pointing ssh tools at this agent
    pub fn env(&self) -> [(String, String); 2] {
        [
            ("SSH_AUTH_SOCK".to_string(), self.socket.clone()),
            ("SSH_AGENT_PID".to_string(), self.pid.clone()),
        ]
    }

    fn kill_command(&self) -> CommandSpec {
        CommandSpec::new("ssh-agent").arg("-k").envs(self.env())
    }

    /// Kill the agent. Failures are logged, never returned.
    pub async fn stop(mut self) {
        self.release().await;
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.executor.run_checked(&self.kill_command(), None).await {
            warn!(pid = %self.pid, error = %e, "failed to stop ssh-agent");
        }
    }
}

impl Drop for SshAgent {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(pid = %self.pid, "ssh-agent dropped before being stopped, killing it");

        let kill = self.kill_command();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let executor = Arc::clone(&self.executor);
                let pid = self.pid.clone();
                handle.spawn(async move {
                    if let Err(e) = executor.run_checked(&kill, None).await {
                        warn!(%pid, error = %e, "failed to stop ssh-agent");
                    }
                });
            }
            Err(_) if !self.executor.is_simulated() => {
                let status = std::process::Command::new(&kill.program)
                    .args(&kill.args)
                    .envs(&kill.env)
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status();
                if let Err(e) = status {
                    warn!(pid = %self.pid, error = %e, "failed to stop ssh-agent");
                }
            }
            Err(_) => {}
        }
    }
}

/// Local credential locations that may need to be copied to the runner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSources {
    pub aws_dir: Option<PathBuf>,
    pub gce_file: Option<PathBuf>,
    pub azure_dir: Option<PathBuf>,
}

/// Steps that prepare a runner and run one command on it
pub struct RemoteSession<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub target: &'a RemoteTarget,
    pub agent: &'a SshAgent,
}

impl RemoteSession<'_> {
    fn with_agent(&self, spec: CommandSpec) -> CommandSpec {
        spec.envs(self.agent.env())
    }

    /// Copy the local workspace to the runner
    pub async fn sync_workspace(&self, local_workspace: &Path) -> ServiceResult<()> {
        let spec = self.target.push(contents_of(local_workspace), &self.target.workspace);
        self.executor.run_checked(&self.with_agent(spec), None).await?;
        Ok(())
    }

    /// Copy credential files. AWS credentials are skipped when they travel as
    /// variables; provider files are copied only for that provider's backends.
    pub async fn sync_credentials(
        &self,
        sources: &CredentialSources,
        provider: Option<CloudProvider>,
        aws_forwarded: bool,
    ) -> ServiceResult<()> {
        if !aws_forwarded {
            if let Some(dir) = self.existing(&sources.aws_dir) {
                info!(host = %self.target.host, "syncing AWS credentials to runner");
                let spec = self.target.push(contents_of(&dir), ".aws/");
                self.executor.run_checked(&self.with_agent(spec), None).await?;
            }
        }

        match provider {
            Some(CloudProvider::Gce) => {
                if let Some(file) = self.existing(&sources.gce_file) {
                    let name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let spec = self.target.push(&file, name);
                    self.executor.run_checked(&self.with_agent(spec), None).await?;
                }
            }
            Some(CloudProvider::Azure) => {
                if let Some(dir) = self.existing(&sources.azure_dir) {
                    let spec = self.target.push(contents_of(&dir), ".azure/");
                    self.executor.run_checked(&self.with_agent(spec), None).await?;
                }
            }
            Some(CloudProvider::Aws) | None => {}
        }
        Ok(())
    }

    /// Credential path if it is configured and present on this host
    fn existing(&self, path: &Option<PathBuf>) -> Option<PathBuf> {
        let path = path.as_ref()?;
        if path.exists() {
            Some(path.clone())
        } else {
            debug!(path = %path.display(), "credential source not present, skipping");
            None
        }
    }

    /// Supplementary group ids of the login user on the runner
    pub async fn group_ids(&self) -> ServiceResult<Vec<String>> {
        let spec = self.with_agent(self.target.ssh("id -G"));
        let output = self.executor.run_checked(&spec, None).await?;
        Ok(output
            .stdout
            .split_whitespace()
            .map(String::from)
            .collect())
    }

    /// Run a container on the runner. Sensitive variables are assigned in
    /// front of `docker` and masked in every rendering of the ssh command.
    pub fn remote_docker(&self, invocation: &ContainerInvocation) -> CommandSpec {
        let assignments = invocation
            .sensitive_env()
            .map(|(key, value)| shell_quote(&format!("{}={}", key, value)));
        let docker = std::iter::once("docker".to_string())
            .chain(invocation.docker_args())
            .map(|a| shell_quote(&a));
        let line = assignments.chain(docker).collect::<Vec<_>>().join(" ");

        invocation
            .sensitive_env()
            .fold(self.with_agent(self.target.ssh(line)), |spec, (_, value)| {
                spec.secret(value.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::DryRunExecutor;

    fn target() -> RemoteTarget {
        RemoteTarget::new(Ipv4Addr::new(10, 0, 1, 5), "ubuntu", "/home/ubuntu/sct-workspace")
    }

    #[test]
    fn test_validate_runner_address() {
        assert_eq!(
            validate_runner_address("10.0.1.5").unwrap(),
            Ipv4Addr::new(10, 0, 1, 5)
        );
        assert_eq!(
            validate_runner_address(" 54.12.0.255\n").unwrap(),
            Ipv4Addr::new(54, 12, 0, 255)
        );
        for bad in ["999.999.999.999", "10.0.1", "10.0.1.5.6", "runner.local", "", "::1", "10.0.1.-1"] {
            let err = validate_runner_address(bad).unwrap_err();
            assert!(
                matches!(err, ServiceError::NetworkValidation { .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_target_mode_remote() {
        assert!(TargetMode::remote("999.999.999.999").is_err());
        assert_eq!(
            TargetMode::remote("1.2.3.4").unwrap(),
            TargetMode::Remote(Ipv4Addr::new(1, 2, 3, 4))
        );
    }

    #[test]
    fn test_parse_agent_output() {
        let out = "SSH_AUTH_SOCK=/tmp/ssh-abc/agent.41; export SSH_AUTH_SOCK;\n\
                   SSH_AGENT_PID=42; export SSH_AGENT_PID;\necho Agent pid 42;\n";
        let (socket, pid) = SshAgent::parse(out).unwrap();
        assert_eq!(socket, "/tmp/ssh-abc/agent.41");
        assert_eq!(pid, "42");

        assert!(SshAgent::parse("Could not open a connection").is_err());
    }

    #[test]
    fn test_rsync_commands() {
        let push = target().push("/ws/", "/home/ubuntu/sct-workspace");
        assert_eq!(push.program, "rsync");
        assert_eq!(
            push.args.last().map(String::as_str),
            Some("ubuntu@10.0.1.5:/home/ubuntu/sct-workspace")
        );
        assert!(push.args.iter().any(|a| a.starts_with("ssh -o StrictHostKeyChecking=no")));

        let pull = target().pull("/home/ubuntu/sct-workspace/latest/", "/ws/artifacts");
        assert_eq!(pull.args.last().map(String::as_str), Some("/ws/artifacts"));
    }

    #[tokio::test]
    async fn test_agent_released_when_key_load_fails() {
        struct FailingSshAdd(DryRunExecutor);

        #[async_trait::async_trait]
        impl CommandExecutor for FailingSshAdd {
            async fn run(
                &self,
                spec: &CommandSpec,
                timeout: Option<std::time::Duration>,
            ) -> ServiceResult<crate::runners::CommandOutput> {
                let mut output = self.0.run(spec, timeout).await?;
                if spec.program == "ssh-add" {
                    output.exit_code = Some(1);
                }
                Ok(output)
            }

            fn is_simulated(&self) -> bool {
                true
            }
        }

        let executor = Arc::new(FailingSshAdd(DryRunExecutor::quiet()));
        let result = SshAgent::start(executor.clone(), &[PathBuf::from("/keys/a")]).await;

        assert!(result.is_err());
        let recorded = executor.0.recorded();
        assert_eq!(recorded, vec!["ssh-agent -s", "ssh-add /keys/a", "ssh-agent -k"]);
    }

    #[tokio::test]
    async fn test_dropped_agent_is_still_killed() {
        let executor = Arc::new(DryRunExecutor::quiet());
        let agent = SshAgent::start(executor.clone(), &[]).await.unwrap();

        drop(agent);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(executor.recorded(), vec!["ssh-agent -s", "ssh-agent -k"]);
    }

    #[tokio::test]
    async fn test_remote_docker_quotes_arguments() {
        let executor = Arc::new(DryRunExecutor::quiet());
        let agent = SshAgent::start(executor.clone(), &[]).await.unwrap();
        let target = target();
        let session = RemoteSession {
            executor: executor.as_ref(),
            target: &target,
            agent: &agent,
        };

        let mut env = std::collections::BTreeMap::new();
        env.insert("SCT_REGION_NAME".to_string(), "eu-west-1 us-east-1".to_string());
        env.insert("AWS_SECRET_ACCESS_KEY".to_string(), "wJal rXUt".to_string());
        let invocation = ContainerInvocation::new("img:1", "/ws")
            .with_env(env)
            .with_command(vec!["./sct.py".to_string()]);
        let spec = session.remote_docker(&invocation);

        assert_eq!(spec.program, "ssh");
        let line = spec.args.last().map(String::as_str).unwrap_or_default();
        assert!(line.starts_with("'AWS_SECRET_ACCESS_KEY=wJal rXUt' docker run --rm"));
        assert!(line.contains("-e AWS_SECRET_ACCESS_KEY -e 'SCT_REGION_NAME=eu-west-1 us-east-1' img:1 ./sct.py"));
        assert!(spec.env.contains_key("SSH_AUTH_SOCK"));
        assert!(!spec.command_line().contains("wJal"));
        assert!(spec.command_line().contains("AWS_SECRET_ACCESS_KEY=***"));
        agent.stop().await;
    }
}
