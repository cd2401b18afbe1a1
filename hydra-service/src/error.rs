// Service Errors
// Error taxonomy shared by the resolver, budgeter, dispatcher and sequencer

use std::time::Duration;
use thiserror::Error;

/// Errors produced while resolving, dispatching or sequencing a run
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid, missing or conflicting input. Aborts the branch before
    /// anything is provisioned.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external step exited non-zero (or could not be spawned)
    #[error("command `{command}` failed ({})", describe_exit(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A stage ran past its allocation
    #[error("{stage} exceeded its budget of {} minutes", .limit.as_secs() / 60)]
    Timeout { stage: String, limit: Duration },

    /// Runner address is not a dotted-quad IPv4 address
    #[error(
        "invalid runner address '{address}': expected a dotted-quad IPv4 address. \
         Look the runner up with `hydra list-resources --test-id <id>` and retry \
         with `--execute-on-runner <ip>`"
    )]
    NetworkValidation { address: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias used across the service
pub type ServiceResult<T> = Result<T, ServiceError>;

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated without an exit code".to_string(),
    }
}

impl ServiceError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn command(command: impl Into<String>, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Fatal errors abort the branch without finalization
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::NetworkValidation { .. } | Self::Yaml(_)
        )
    }

    /// Step failures that are recorded and sequenced past
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::Command { .. } | Self::Timeout { .. } | Self::Io(_))
    }

    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Yaml(_) => 2,
            Self::NetworkValidation { .. } => 3,
            Self::Command {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}
