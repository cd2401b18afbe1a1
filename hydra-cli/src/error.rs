// CLI Errors
// Error type shared by both binaries and its exit code mapping

use hydra_service::ServiceError;

/// Errors surfaced by the binaries. `exit_code()` decides the process status.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad command line. The message already carries the usage text.
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("run did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// No branch produced artifacts
    #[error("run failing: no branch collected artifacts")]
    RunFailing,
}

impl CliError {
    /// | Code | Meaning                                  |
    /// |------|------------------------------------------|
    /// | 1    | usage error, failing run, or no code     |
    /// | 2    | configuration error                      |
    /// | 3    | invalid runner address                   |
    /// | n    | exit code of the failed command          |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Service(e) => e.exit_code(),
            Self::Usage(_) | Self::Io(_) | Self::Logging(_) | Self::Join(_) | Self::RunFailing => 1,
        }
    }
}

impl From<clap::Error> for CliError {
    fn from(e: clap::Error) -> Self {
        Self::Usage(e.render().to_string())
    }
}
