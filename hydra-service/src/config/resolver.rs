// Environment Resolver
// Turns raw parameters into an immutable RunConfiguration

use crate::config::models::{
    ArtifactSource, Backend, DisposalPolicy, PostBehavior, ProvisionType, RunConfiguration,
};
use crate::config::params::{non_empty, RawParams};
use crate::error::{ServiceError, ServiceResult};

use std::collections::BTreeMap;
use tracing::warn;

/// Test run when the parameters name none
pub const DEFAULT_TEST_NAME: &str = "longevity_test.LongevityTest.test_custom_time";

/// Duration used when the parameters name none
pub const DEFAULT_DURATION_MINUTES: i64 = 360;

/// How to treat more than one artifact-source selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorPolicy {
    /// Take the highest-priority selector and ignore the rest
    #[default]
    FirstMatch,
    /// Reject ambiguous input
    Strict,
}

/// Resolves raw parameters into a RunConfiguration
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    policy: SelectorPolicy,
}

impl EnvironmentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: SelectorPolicy) -> Self {
        Self { policy }
    }

    /// Resolve parameters. Pure: no side effects beyond the returned value.
    pub fn resolve(&self, params: &RawParams) -> ServiceResult<RunConfiguration> {
        let backend: Backend = match non_empty(&params.backend) {
            Some(name) => name.parse()?,
            None => Backend::Aws,
        };

        let artifact_source = self.select_artifact_source(params)?;

        let region = non_empty(&params.region)
            .map(|r| r.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| backend.default_region().to_string());

        let disposal = DisposalPolicy {
            db_nodes: parse_or_default(&params.post_behavior_db_nodes)?,
            loader_nodes: parse_or_default(&params.post_behavior_loader_nodes)?,
            monitor_nodes: parse_or_default(&params.post_behavior_monitor_nodes)?,
        };
        let provision_type: ProvisionType = parse_or_default(&params.provision_type)?;

        let availability_zone = non_empty(&params.availability_zone)
            .unwrap_or("a")
            .to_string();
        let test_name = non_empty(&params.test_name)
            .unwrap_or(DEFAULT_TEST_NAME)
            .to_string();
        let test_config = non_empty(&params.test_config).map(String::from);
        if let Some(raw) = &params.invalid_duration {
            return Err(ServiceError::config(format!(
                "test duration must be a whole number of minutes, got '{}'",
                raw.trim()
            )));
        }
        let duration_minutes = params.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        let email_recipients = non_empty(&params.email_recipients)
            .map(|list| {
                list.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|r| !r.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut env_overlay = BTreeMap::new();
        env_overlay.insert("SCT_CLUSTER_BACKEND".to_string(), backend.to_string());
        env_overlay.insert("SCT_REGION_NAME".to_string(), region.clone());
        env_overlay.insert("SCT_AVAILABILITY_ZONE".to_string(), availability_zone.clone());
        for (name, value) in artifact_source.env_overlay() {
            env_overlay.insert(name.to_string(), value);
        }
        env_overlay.insert(
            "SCT_POST_BEHAVIOR_DB_NODES".to_string(),
            disposal.db_nodes.as_str().to_string(),
        );
        env_overlay.insert(
            "SCT_POST_BEHAVIOR_LOADER_NODES".to_string(),
            disposal.loader_nodes.as_str().to_string(),
        );
        env_overlay.insert(
            "SCT_POST_BEHAVIOR_MONITOR_NODES".to_string(),
            disposal.monitor_nodes.as_str().to_string(),
        );
        env_overlay.insert(
            "SCT_INSTANCE_PROVISION".to_string(),
            provision_type.as_str().to_string(),
        );
        if let Some(config) = &test_config {
            env_overlay.insert("SCT_CONFIG_FILES".to_string(), config.clone());
        }
        for (key, value) in &params.extra_env {
            env_overlay
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        Ok(RunConfiguration {
            backend,
            region,
            availability_zone,
            artifact_source,
            disposal,
            provision_type,
            test_name,
            test_config,
            duration_minutes,
            email_recipients,
            env_overlay,
        })
    }

    /// Pick the artifact source by fixed priority: ami_id > version > repo.
    /// A docker image rides on `version` as its tag.
    fn select_artifact_source(&self, params: &RawParams) -> ServiceResult<ArtifactSource> {
        let ami_id = non_empty(&params.ami_id);
        let version = non_empty(&params.version);
        let repo = non_empty(&params.repo);
        let docker_image = non_empty(&params.docker_image);

        if docker_image.is_some() && version.is_none() {
            return Err(ServiceError::config("docker image requires explicit version"));
        }

        let mut candidates = Vec::new();
        if let Some(ami_id) = ami_id {
            candidates.push(ArtifactSource::AmiId {
                ami_id: ami_id.to_string(),
            });
        }
        if let Some(version) = version {
            candidates.push(match docker_image {
                Some(image) => ArtifactSource::DockerImage {
                    image: image.to_string(),
                    version: version.to_string(),
                },
                None => ArtifactSource::Version {
                    version: version.to_string(),
                },
            });
        }
        if let Some(repo) = repo {
            candidates.push(ArtifactSource::Repo {
                repo: repo.to_string(),
            });
        }

        if candidates.is_empty() {
            return Err(ServiceError::config("no artifact source specified"));
        }

        if candidates.len() > 1 {
            let names: Vec<&str> = candidates.iter().map(|c| c.selector()).collect();
            match self.policy {
                SelectorPolicy::Strict => {
                    return Err(ServiceError::config(format!(
                        "conflicting artifact sources specified: {}",
                        names.join(", ")
                    )));
                }
                SelectorPolicy::FirstMatch => {
                    warn!(
                        selected = names[0],
                        ignored = %names[1..].join(", "),
                        "multiple artifact sources specified, using highest priority"
                    );
                }
            }
        }

        Ok(candidates.swap_remove(0))
    }
}

fn parse_or_default<T>(value: &Option<String>) -> ServiceResult<T>
where
    T: std::str::FromStr<Err = ServiceError> + Default,
{
    match non_empty(value) {
        Some(v) => v.parse(),
        None => Ok(T::default()),
    }
}

/// Convenience wrapper around the default resolver
pub fn resolve(params: &RawParams) -> ServiceResult<RunConfiguration> {
    EnvironmentResolver::new().resolve(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with(ami: Option<&str>, version: Option<&str>, repo: Option<&str>, docker: Option<&str>) -> RawParams {
        RawParams {
            ami_id: ami.map(String::from),
            version: version.map(String::from),
            repo: repo.map(String::from),
            docker_image: docker.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_ami_wins_over_version() {
        let config = resolve(&params_with(Some("ami-123"), Some("1.2.3"), None, None)).unwrap();

        assert_eq!(
            config.artifact_source,
            ArtifactSource::AmiId {
                ami_id: "ami-123".to_string()
            }
        );
        assert_eq!(config.env_overlay.get("SCT_AMI_ID_DB_SCYLLA"), Some(&"ami-123".to_string()));
        assert!(!config.env_overlay.contains_key("SCT_SCYLLA_VERSION"));
    }

    #[test]
    fn test_no_selector_fails() {
        let err = resolve(&RawParams::default()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "configuration error: no artifact source specified");
    }

    #[test]
    fn test_blank_selectors_count_as_absent() {
        let err = resolve(&params_with(Some("  "), Some(""), None, None)).unwrap_err();
        assert!(err.to_string().contains("no artifact source specified"));
    }

    #[test]
    fn test_priority_order_every_combination() {
        let values = [Some("ami-1"), Some("4.6"), Some("http://repo/list"), None];
        for mask in 1u8..8 {
            let ami = if mask & 1 != 0 { values[0] } else { None };
            let version = if mask & 2 != 0 { values[1] } else { None };
            let repo = if mask & 4 != 0 { values[2] } else { None };

            let config = resolve(&params_with(ami, version, repo, values[3])).unwrap();
            let expected = if ami.is_some() {
                "ami_id"
            } else if version.is_some() {
                "version"
            } else {
                "repo"
            };
            assert_eq!(config.artifact_source.selector(), expected, "mask {mask}");
        }
    }

    #[test]
    fn test_strict_policy_rejects_ambiguity() {
        let resolver = EnvironmentResolver::with_policy(SelectorPolicy::Strict);
        let err = resolver
            .resolve(&params_with(Some("ami-123"), Some("1.2.3"), None, None))
            .unwrap_err();
        assert!(err.to_string().contains("conflicting artifact sources specified: ami_id, version"));

        let ok = resolver.resolve(&params_with(None, None, Some("http://repo"), None));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_docker_image_requires_version() {
        let err = resolve(&params_with(None, None, None, Some("scylladb/scylla"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: docker image requires explicit version"
        );

        // Even when another selector would win
        let err = resolve(&params_with(Some("ami-1"), None, None, Some("scylladb/scylla"))).unwrap_err();
        assert!(err.to_string().contains("docker image requires explicit version"));
    }

    #[test]
    fn test_docker_image_with_version() {
        let mut params = params_with(None, Some("5.4.0"), None, Some("scylladb/scylla"));
        params.backend = Some("docker".to_string());
        let config = resolve(&params).unwrap();

        assert_eq!(
            config.artifact_source,
            ArtifactSource::DockerImage {
                image: "scylladb/scylla".to_string(),
                version: "5.4.0".to_string()
            }
        );
        assert_eq!(config.region, "local");
        assert_eq!(config.env_overlay.get("SCT_DOCKER_IMAGE"), Some(&"scylladb/scylla".to_string()));
    }

    #[test]
    fn test_defaults_applied() {
        let config = resolve(&params_with(None, Some("2024.2"), None, None)).unwrap();

        assert_eq!(config.backend, Backend::Aws);
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.availability_zone, "a");
        assert_eq!(config.disposal, DisposalPolicy::default());
        assert_eq!(config.disposal.loader_nodes, PostBehavior::Destroy);
        assert_eq!(config.provision_type, ProvisionType::Spot);
        assert_eq!(config.test_name, DEFAULT_TEST_NAME);
        assert_eq!(config.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert!(config.email_recipients.is_empty());
        assert_eq!(
            config.env_overlay.get("SCT_POST_BEHAVIOR_DB_NODES"),
            Some(&"destroy".to_string())
        );
    }

    #[test]
    fn test_invalid_policy_values() {
        let mut params = params_with(Some("ami-1"), None, None, None);
        params.post_behavior_monitor_nodes = Some("stop".to_string());
        assert!(resolve(&params).unwrap_err().is_fatal());

        let mut params = params_with(Some("ami-1"), None, None, None);
        params.provision_type = Some("reserved".to_string());
        assert!(resolve(&params).unwrap_err().to_string().contains("invalid provision type"));
    }

    #[test]
    fn test_malformed_duration_is_rejected() {
        let mut params = params_with(Some("ami-1"), None, None, None);
        params = params.merged_with(RawParams::from_env_vars(vec![("SCT_TEST_DURATION", "three hours")]));

        let err = resolve(&params).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
        assert!(err.to_string().contains("three hours"));
    }

    #[test]
    fn test_overlay_and_recipients() {
        let mut params = params_with(None, None, Some("http://repo"), None);
        params.region = Some("  eu-west-1   us-east-1 ".to_string());
        params.email_recipients = Some("qa@example.com, dev@example.com qa-lead@example.com".to_string());
        params.extra_env.insert("SCT_N_DB_NODES".to_string(), "6".to_string());
        params.extra_env.insert("SCT_CLUSTER_BACKEND".to_string(), "gce".to_string());
        let config = resolve(&params).unwrap();

        assert_eq!(config.region, "eu-west-1 us-east-1");
        assert_eq!(config.regions(), vec!["eu-west-1", "us-east-1"]);
        assert_eq!(config.primary_region(), "eu-west-1");
        assert_eq!(config.email_recipients.len(), 3);
        assert_eq!(config.env_overlay.get("SCT_N_DB_NODES"), Some(&"6".to_string()));
        // resolver-owned keys are not overridden by the user overlay
        assert_eq!(config.env_overlay.get("SCT_CLUSTER_BACKEND"), Some(&"aws".to_string()));
    }
}
