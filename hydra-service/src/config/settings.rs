// Tool Settings
// Execution image, forwarding rules, remote layout and logging options

use crate::error::{ServiceError, ServiceResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no path is given
pub const LOCAL_SETTINGS_FILE: &str = "hydra.yaml";

/// Settings for the dispatcher and the CLIs. Every field has a default, so
/// an empty file (or no file at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydraSettings {
    /// Execution environment image, without tag
    pub image: String,
    /// Pinned image tag
    pub image_tag: String,
    /// Program invoked inside the execution environment
    pub entrypoint: String,
    /// Environment variable name prefixes forwarded into the environment
    pub forwarded_env_prefixes: Vec<String>,
    /// Login user on the runner
    pub remote_user: String,
    /// Workspace location on the runner
    pub remote_workspace: PathBuf,
    /// Deployment keys loaded into the ssh agent
    pub ssh_keys: Vec<PathBuf>,
    pub aws_credentials_dir: Option<PathBuf>,
    pub gce_credentials_file: Option<PathBuf>,
    pub azure_credentials_dir: Option<PathBuf>,
    /// Name of the file holding the provisioned runner address
    pub runner_ip_file: String,
    pub log_level: String,
    /// `pretty`, `compact` or `json`
    pub log_format: String,
}

impl Default for HydraSettings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        Self {
            image: "scylladb/hydra".to_string(),
            image_tag: "v0.89".to_string(),
            entrypoint: "./sct.py".to_string(),
            forwarded_env_prefixes: ["SCT_", "BUILD_", "JOB_", "GIT_", "AWS_", "GOOGLE_", "AZURE_"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            remote_user: "ubuntu".to_string(),
            remote_workspace: PathBuf::from("/home/ubuntu/sct-workspace"),
            ssh_keys: vec![
                home.join(".ssh").join("scylla-qa-ec2"),
                home.join(".ssh").join("scylla-test"),
            ],
            aws_credentials_dir: Some(home.join(".aws")),
            gce_credentials_file: Some(home.join(".google_libcloud_auth.qa")),
            azure_credentials_dir: Some(home.join(".azure")),
            runner_ip_file: "sct_runner_ip".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl HydraSettings {
    /// Image reference including the pinned tag
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_tag)
    }

    pub fn from_yaml_str(content: &str) -> ServiceResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::config(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load settings: explicit path, then `./hydra.yaml`, then the user
    /// config directory, then defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> ServiceResult<Self> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::candidate_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        settings.apply_env_overrides(std::env::vars());
        Ok(settings)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_SETTINGS_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("hydra").join("config.yaml"));
        }
        paths
    }

    /// `HYDRA_IMAGE` (repo[:tag]) and `HYDRA_LOG_LEVEL` override file values
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "HYDRA_IMAGE" if !value.is_empty() => {
                    // a ':' followed by a path segment belongs to a registry port
                    if let Some((image, tag)) = value.rsplit_once(':').filter(|(_, t)| !t.contains('/')) {
                        self.image = image.to_string();
                        self.image_tag = tag.to_string();
                    } else {
                        self.image = value.clone();
                    }
                }
                "HYDRA_LOG_LEVEL" if !value.is_empty() => self.log_level = value,
                _ => {}
            }
        }
    }
}
