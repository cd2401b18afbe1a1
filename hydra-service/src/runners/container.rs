// Container Invocation
// Builds the `docker run` command that wraps every dispatched step

use crate::runners::{is_sensitive, CommandSpec};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A one-shot container run bound to a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
    /// Pinned image reference (`repo:tag`)
    pub image: String,
    /// Host path mounted at the same location inside the container
    pub workspace: PathBuf,
    /// Variables passed with `-e`. Sensitive ones are passed by name only.
    pub env: BTreeMap<String, String>,
    /// Supplementary group ids passed with `--group-add`
    pub group_ids: Vec<String>,
    /// Extra volumes (`host:container`)
    pub volumes: Vec<String>,
    /// Command run inside the container
    pub command: Vec<String>,
}

impl ContainerInvocation {
    pub fn new(image: impl Into<String>, workspace: impl AsRef<Path>) -> Self {
        Self {
            image: image.into(),
            workspace: workspace.as_ref().to_path_buf(),
            env: BTreeMap::new(),
            group_ids: Vec::new(),
            volumes: Vec::new(),
            command: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_group_ids(mut self, group_ids: Vec<String>) -> Self {
        self.group_ids = group_ids;
        self
    }

    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Arguments following `docker`
    pub fn docker_args(&self) -> Vec<String> {
        let workspace = self.workspace.display().to_string();

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--init".to_string(),
            "--network=host".to_string(),
            "-v".to_string(),
            format!("{}:{}", workspace, workspace),
            "-w".to_string(),
            workspace,
        ];

        for volume in &self.volumes {
            args.push("-v".to_string());
            args.push(volume.clone());
        }

        for gid in &self.group_ids {
            args.push("--group-add".to_string());
            args.push(gid.clone());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            if is_sensitive(key) {
                args.push(key.clone());
            } else {
                args.push(format!("{}={}", key, value));
            }
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }

    /// Variables whose values reach docker through its environment
    pub fn sensitive_env(&self) -> impl Iterator<Item = (&String, &String)> {
        self.env.iter().filter(|(key, _)| is_sensitive(key))
    }

    /// Complete command for running on this host
    pub fn to_command(&self) -> CommandSpec {
        CommandSpec::new("docker")
            .args(self.docker_args())
            .envs(self.sensitive_env().map(|(k, v)| (k.clone(), v.clone())))
    }
}
