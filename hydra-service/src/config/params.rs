// Raw Run Parameters
// Unvalidated parameters as they arrive from a YAML file or SCT_ environment variables

use crate::error::ServiceResult;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix of environment variables that carry run parameters
pub const PARAM_ENV_PREFIX: &str = "SCT_";

/// Raw, unvalidated run parameters. Every field is optional; the
/// resolver applies defaults and enforces the selector rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawParams {
    pub backend: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,

    pub ami_id: Option<String>,
    pub version: Option<String>,
    pub repo: Option<String>,
    pub docker_image: Option<String>,

    pub post_behavior_db_nodes: Option<String>,
    pub post_behavior_loader_nodes: Option<String>,
    pub post_behavior_monitor_nodes: Option<String>,
    pub provision_type: Option<String>,

    pub test_name: Option<String>,
    pub test_config: Option<String>,
    pub duration_minutes: Option<i64>,
    /// `SCT_TEST_DURATION` as given when it is not a whole number
    #[serde(skip)]
    pub invalid_duration: Option<String>,
    pub email_recipients: Option<String>,

    /// Passed through to every command of the branch
    pub extra_env: BTreeMap<String, String>,
}

impl RawParams {
    /// Load parameters from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ServiceResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Collect parameters from `SCT_`-prefixed variables. An unparseable
    /// duration is kept aside for the resolver to reject.
    pub fn from_env_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = RawParams::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(PARAM_ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().to_string();
            match name {
                "CLUSTER_BACKEND" => params.backend = Some(value),
                "REGION_NAME" => params.region = Some(value),
                "AVAILABILITY_ZONE" => params.availability_zone = Some(value),
                "AMI_ID_DB_SCYLLA" => params.ami_id = Some(value),
                "SCYLLA_VERSION" => params.version = Some(value),
                "SCYLLA_REPO" => params.repo = Some(value),
                "DOCKER_IMAGE" => params.docker_image = Some(value),
                "POST_BEHAVIOR_DB_NODES" => params.post_behavior_db_nodes = Some(value),
                "POST_BEHAVIOR_LOADER_NODES" => params.post_behavior_loader_nodes = Some(value),
                "POST_BEHAVIOR_MONITOR_NODES" => params.post_behavior_monitor_nodes = Some(value),
                "INSTANCE_PROVISION" => params.provision_type = Some(value),
                "TEST_NAME" => params.test_name = Some(value),
                "CONFIG_FILES" => params.test_config = Some(value),
                "TEST_DURATION" => match value.trim().parse() {
                    Ok(minutes) => {
                        params.duration_minutes = Some(minutes);
                        params.invalid_duration = None;
                    }
                    Err(_) => {
                        params.duration_minutes = None;
                        params.invalid_duration = Some(value);
                    }
                },
                "EMAIL_RECIPIENTS" => params.email_recipients = Some(value),
                _ => {
                    params.extra_env.insert(key.as_ref().to_string(), value);
                }
            }
        }
        params
    }

    /// Overlay `other` on top of `self`; set fields in `other` win
    pub fn merged_with(mut self, other: RawParams) -> Self {
        if other.duration_minutes.is_some() || other.invalid_duration.is_some() {
            self.invalid_duration = other.invalid_duration.clone();
        }
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            backend,
            region,
            availability_zone,
            ami_id,
            version,
            repo,
            docker_image,
            post_behavior_db_nodes,
            post_behavior_loader_nodes,
            post_behavior_monitor_nodes,
            provision_type,
            test_name,
            test_config,
            duration_minutes,
            email_recipients
        );
        self.extra_env.extend(other.extra_env);
        self
    }
}

/// Trimmed, non-empty value of an optional parameter
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
