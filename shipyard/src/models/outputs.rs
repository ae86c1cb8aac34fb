//! Provisioning outputs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named values produced by a successful run, e.g. `public_ip` or
/// `load_balancer_hostname`. Built once, then only read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisioningOutputs(BTreeMap<String, String>);

impl ProvisioningOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion used while assembling the outputs
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Merge `other` into a copy of `self`; `other` wins on conflicts
    pub fn merged(mut self, other: &ProvisioningOutputs) -> Self {
        self.0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ProvisioningOutputs {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
