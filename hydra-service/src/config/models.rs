// Run Configuration Models
// Typed view of a resolved run: backend, region, artifact source, disposal policy

use crate::error::{ServiceError, ServiceResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Cloud provider behind a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gce,
    Azure,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gce => "gce",
            CloudProvider::Azure => "azure",
        }
    }

    /// Region used when the parameters name none
    pub fn default_region(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "eu-west-1",
            CloudProvider::Gce => "us-east1",
            CloudProvider::Azure => "eastus",
        }
    }
}

/// Supported cluster backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "aws")]
    Aws,
    #[serde(rename = "aws-siren")]
    AwsSiren,
    #[serde(rename = "gce")]
    Gce,
    #[serde(rename = "gce-siren")]
    GceSiren,
    #[serde(rename = "azure")]
    Azure,
    #[serde(rename = "docker")]
    Docker,
    #[serde(rename = "baremetal")]
    Baremetal,
    #[serde(rename = "k8s-local-kind")]
    K8sLocalKind,
    #[serde(rename = "k8s-eks")]
    K8sEks,
    #[serde(rename = "k8s-gke")]
    K8sGke,
}

impl Backend {
    pub const ALL: [Backend; 10] = [
        Backend::Aws,
        Backend::AwsSiren,
        Backend::Gce,
        Backend::GceSiren,
        Backend::Azure,
        Backend::Docker,
        Backend::Baremetal,
        Backend::K8sLocalKind,
        Backend::K8sEks,
        Backend::K8sGke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Aws => "aws",
            Backend::AwsSiren => "aws-siren",
            Backend::Gce => "gce",
            Backend::GceSiren => "gce-siren",
            Backend::Azure => "azure",
            Backend::Docker => "docker",
            Backend::Baremetal => "baremetal",
            Backend::K8sLocalKind => "k8s-local-kind",
            Backend::K8sEks => "k8s-eks",
            Backend::K8sGke => "k8s-gke",
        }
    }

    pub fn cloud_provider(&self) -> Option<CloudProvider> {
        match self {
            Backend::Aws | Backend::AwsSiren | Backend::K8sEks => Some(CloudProvider::Aws),
            Backend::Gce | Backend::GceSiren | Backend::K8sGke => Some(CloudProvider::Gce),
            Backend::Azure => Some(CloudProvider::Azure),
            Backend::Docker | Backend::Baremetal | Backend::K8sLocalKind => None,
        }
    }

    /// Whether test execution can be delegated to a provisioned runner
    pub fn supports_remote_runner(&self) -> bool {
        self.cloud_provider().is_some()
    }

    pub fn is_kubernetes(&self) -> bool {
        matches!(self, Backend::K8sLocalKind | Backend::K8sEks | Backend::K8sGke)
    }

    pub fn default_region(&self) -> &'static str {
        self.cloud_provider()
            .map(|p| p.default_region())
            .unwrap_or("local")
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ServiceError;

    fn from_str(s: &str) -> ServiceResult<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Backend::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Backend::ALL.iter().map(|b| b.as_str()).collect();
                ServiceError::config(format!(
                    "unknown backend '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Where the database build under test comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    AmiId { ami_id: String },
    Version { version: String },
    Repo { repo: String },
    DockerImage { image: String, version: String },
}

impl ArtifactSource {
    /// Selector name as it appears in parameters
    pub fn selector(&self) -> &'static str {
        match self {
            ArtifactSource::AmiId { .. } => "ami_id",
            ArtifactSource::Version { .. } => "version",
            ArtifactSource::Repo { .. } => "repo",
            ArtifactSource::DockerImage { .. } => "docker_image",
        }
    }

    /// Environment variables the test framework reads for this source
    pub fn env_overlay(&self) -> Vec<(&'static str, String)> {
        match self {
            ArtifactSource::AmiId { ami_id } => vec![("SCT_AMI_ID_DB_SCYLLA", ami_id.clone())],
            ArtifactSource::Version { version } => vec![("SCT_SCYLLA_VERSION", version.clone())],
            ArtifactSource::Repo { repo } => vec![("SCT_SCYLLA_REPO", repo.clone())],
            ArtifactSource::DockerImage { image, version } => vec![
                ("SCT_DOCKER_IMAGE", image.clone()),
                ("SCT_SCYLLA_VERSION", version.clone()),
            ],
        }
    }
}

/// What happens to a class of nodes after the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PostBehavior {
    Keep,
    KeepOnFailure,
    #[default]
    Destroy,
}

impl PostBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostBehavior::Keep => "keep",
            PostBehavior::KeepOnFailure => "keep-on-failure",
            PostBehavior::Destroy => "destroy",
        }
    }
}

impl FromStr for PostBehavior {
    type Err = ServiceError;

    fn from_str(s: &str) -> ServiceResult<Self> {
        match s.trim() {
            "keep" => Ok(PostBehavior::Keep),
            "keep-on-failure" => Ok(PostBehavior::KeepOnFailure),
            "destroy" => Ok(PostBehavior::Destroy),
            other => Err(ServiceError::config(format!(
                "invalid post behavior '{}', expected keep, keep-on-failure or destroy",
                other
            ))),
        }
    }
}

/// Post-run disposal per resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DisposalPolicy {
    pub db_nodes: PostBehavior,
    pub loader_nodes: PostBehavior,
    pub monitor_nodes: PostBehavior,
}

/// Instance purchasing model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionType {
    #[default]
    Spot,
    OnDemand,
    SpotLowPrice,
}

impl ProvisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionType::Spot => "spot",
            ProvisionType::OnDemand => "on_demand",
            ProvisionType::SpotLowPrice => "spot_low_price",
        }
    }
}

impl FromStr for ProvisionType {
    type Err = ServiceError;

    fn from_str(s: &str) -> ServiceResult<Self> {
        match s.trim() {
            "spot" => Ok(ProvisionType::Spot),
            "on_demand" => Ok(ProvisionType::OnDemand),
            "spot_low_price" => Ok(ProvisionType::SpotLowPrice),
            other => Err(ServiceError::config(format!(
                "invalid provision type '{}', expected spot, on_demand or spot_low_price",
                other
            ))),
        }
    }
}

/// Fully resolved, immutable configuration for one branch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfiguration {
    pub backend: Backend,
    /// Whitespace-separated list for multi-region runs
    pub region: String,
    pub availability_zone: String,
    pub artifact_source: ArtifactSource,
    pub disposal: DisposalPolicy,
    pub provision_type: ProvisionType,
    pub test_name: String,
    pub test_config: Option<String>,
    pub duration_minutes: i64,
    pub email_recipients: Vec<String>,
    /// Environment handed to every command of the branch
    pub env_overlay: BTreeMap<String, String>,
}

impl RunConfiguration {
    /// Individual regions of a (possibly multi-region) run
    pub fn regions(&self) -> Vec<&str> {
        self.region.split_whitespace().collect()
    }

    /// First region, where the runner is provisioned
    pub fn primary_region(&self) -> &str {
        self.regions()
            .first()
            .copied()
            .unwrap_or_else(|| self.backend.default_region())
    }
}
