// Runners Module
// Command descriptions, executors and the local/remote execution dispatcher

pub mod container;
pub mod dispatcher;
pub mod dry_run;
pub mod env;
pub mod process;
pub mod remote;

// Re-export key types
pub use container::ContainerInvocation;
pub use dispatcher::{Dispatcher, RequiredTools};
pub use dry_run::DryRunExecutor;
pub use env::EnvForwarder;
pub use process::ProcessExecutor;
pub use remote::{validate_runner_address, RemoteTarget};

use crate::error::{ServiceError, ServiceResult};

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder rendered in place of a secret value
pub const REDACTED: &str = "***";

/// Name fragments marking a variable whose value is never rendered
const SENSITIVE_MARKERS: [&str; 5] = ["SECRET", "TOKEN", "PASSWORD", "CREDENTIAL", "KEY"];

/// True for variables such as `AWS_SECRET_ACCESS_KEY` or `GITHUB_TOKEN`
pub fn is_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Structured description of an external command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set for this command on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    /// Values masked wherever the command is rendered
    pub secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a variable. Values of sensitive names are registered as secrets.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value): (String, String) = (key.into(), value.into());
        if is_sensitive(&key) {
            self.add_secret(value.clone());
        }
        self.env.insert(key, value);
        self
    }

    pub fn envs<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        vars.into_iter().fold(self, |spec, (k, v)| spec.env(k, v))
    }

    /// Mask `value` in every rendering of this command
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.add_secret(value.into());
        self
    }

    fn add_secret(&mut self, value: String) {
        if !value.is_empty() && !self.secrets.contains(&value) {
            self.secrets.push(value);
            self.secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        }
    }

    /// `text` with every secret value, raw or shell-escaped, replaced
    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in &self.secrets {
            redacted = redacted.replace(secret.as_str(), REDACTED);
            let escaped = secret.replace('\'', r"'\''");
            if escaped != *secret {
                redacted = redacted.replace(escaped.as_str(), REDACTED);
            }
        }
        redacted
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Program followed by arguments
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Shell-quoted command line, without the environment, secrets masked
    pub fn command_line(&self) -> String {
        let line = self
            .argv()
            .iter()
            .map(|a| shell_quote(&self.redact(a)))
            .collect::<Vec<_>>()
            .join(" ");
        self.redact(&line)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            if is_sensitive(key) {
                write!(f, "{}={} ", key, REDACTED)?;
            } else {
                write!(f, "{}={} ", key, shell_quote(&self.redact(value)))?;
            }
        }
        f.write_str(&self.command_line())
    }
}

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into a `CommandError`
    pub fn into_result(self, spec: &CommandSpec) -> ServiceResult<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(ServiceError::command(
                spec.command_line(),
                self.exit_code,
                spec.redact(&self.stderr),
            ))
        }
    }
}

/// Where a dispatched command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Isolated container on this host
    Local,
    /// Container on a provisioned runner
    Remote(Ipv4Addr),
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::Local => f.write_str("local"),
            TargetMode::Remote(ip) => write!(f, "remote({})", ip),
        }
    }
}

/// Runs external commands. Implementations decide whether anything is
/// actually spawned.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion. Non-zero exits are returned as output,
    /// not as errors; spawn failures and timeouts are errors.
    async fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> ServiceResult<CommandOutput>;

    /// True when commands are only simulated
    fn is_simulated(&self) -> bool {
        false
    }

    /// Run and turn a non-zero exit into a `CommandError`
    async fn run_checked(&self, spec: &CommandSpec, timeout: Option<Duration>) -> ServiceResult<CommandOutput> {
        self.run(spec, timeout).await?.into_result(spec)
    }
}

/// Quote a word for a POSIX shell. Plain words pass through unchanged.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
