// Environment Forwarding
// Prefix allow-list deciding which host variables reach the execution environment

use std::collections::BTreeMap;

/// Variable whose presence means cloud credentials travel as environment
pub const AWS_KEY_VARIABLE: &str = "AWS_ACCESS_KEY_ID";

/// Snapshot of the forwardable part of an environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvForwarder {
    prefixes: Vec<String>,
    forwarded: BTreeMap<String, String>,
}

impl EnvForwarder {
    /// Keep only variables whose name starts with one of `prefixes`
    pub fn from_vars<I, K, V>(prefixes: &[String], vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let forwarded = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| prefixes.iter().any(|p| k.starts_with(p.as_str())))
            .collect();
        Self {
            prefixes: prefixes.to_vec(),
            forwarded,
        }
    }

    /// Snapshot of the current process environment
    pub fn from_process_env(prefixes: &[String]) -> Self {
        Self::from_vars(prefixes, std::env::vars())
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Forwarded variables merged with a command's own environment. The
    /// overlay is filtered by the same allow-list.
    pub fn merged(&self, overlay: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = self.forwarded.clone();
        for (key, value) in overlay {
            if self.is_allowed(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.forwarded.get(name).map(String::as_str)
    }

    /// Whether AWS credentials are already present as variables
    pub fn has_aws_credentials(&self) -> bool {
        self.get(AWS_KEY_VARIABLE).is_some_and(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.forwarded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwarded.is_empty()
    }
}
