// Persisted Runner State
// Single-line file holding the provisioned runner's address

use crate::error::{ServiceError, ServiceResult};
use crate::runners::validate_runner_address;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Default file name inside a branch workspace
pub const RUNNER_IP_FILE: &str = "sct_runner_ip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerIpFile {
    path: PathBuf,
}

impl RunnerIpFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<workspace>/<name>`
    pub fn in_workspace(workspace: &Path, name: &str) -> Self {
        Self::new(workspace.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the recorded address. A missing or empty file is a
    /// configuration error, never a fallback to local execution.
    pub fn read(&self) -> ServiceResult<Ipv4Addr> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ServiceError::config(format!(
                "runner address file {} is unreadable: {}",
                self.path.display(),
                e
            ))
        })?;
        let line = content.lines().next().unwrap_or_default().trim();
        if line.is_empty() {
            return Err(ServiceError::config(format!(
                "runner address file {} is empty",
                self.path.display()
            )));
        }
        validate_runner_address(line)
    }

    pub fn write(&self, address: Ipv4Addr) -> ServiceResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n", address))?;
        Ok(())
    }
}
