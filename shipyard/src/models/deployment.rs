//! Deployment request and result models

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::outputs::ProvisioningOutputs;

/// Where a repository gets deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Local container runtime
    Local,
    /// Self-managed Kubernetes (kind) on a single cloud VM
    CloudLocal,
    /// Managed Kubernetes service
    CloudHosted,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Local => "local",
            DeploymentMode::CloudLocal => "cloud-local",
            DeploymentMode::CloudHosted => "cloud-hosted",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "local" => Ok(DeploymentMode::Local),
            "cloud-local" => Ok(DeploymentMode::CloudLocal),
            "cloud-hosted" => Ok(DeploymentMode::CloudHosted),
            _ => Err(format!("Invalid deployment mode: {}", s)),
        }
    }
}

/// Cloud credentials supplied with a request.
///
/// Held in memory for one run and handed to subprocesses through their
/// environment only.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudCredentials {
    pub access_key_id: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub secret_access_key: SecretString,

    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub session_token: Option<SecretString>,

    #[serde(default)]
    pub region: Option<String>,
}

impl CloudCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: None,
            region: None,
        }
    }

    /// Environment variables understood by terraform, kubectl exec plugins and the aws CLI
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone());
        env.insert(
            "AWS_SECRET_ACCESS_KEY".to_string(),
            self.secret_access_key.expose_secret().to_string(),
        );
        if let Some(token) = &self.session_token {
            env.insert(
                "AWS_SESSION_TOKEN".to_string(),
                token.expose_secret().to_string(),
            );
        }
        if let Some(region) = &self.region {
            env.insert("AWS_DEFAULT_REGION".to_string(), region.clone());
        }
        env
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn default_namespace() -> String {
    "default".to_string()
}

/// A validated deployment request. Immutable once accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRequest {
    pub repo_url: String,

    pub deployment_mode: DeploymentMode,

    #[serde(default = "default_namespace")]
    pub target_namespace: String,

    #[serde(default)]
    pub cloud_credentials: Option<CloudCredentials>,

    /// EC2 key pair for cloud-local; falls back to the configured default
    #[serde(default)]
    pub key_name: Option<String>,

    /// Overrides the configured region
    #[serde(default)]
    pub region: Option<String>,

    /// Managed cluster for cloud-hosted; falls back to the configured default
    #[serde(default)]
    pub cluster_name: Option<String>,

    /// Port the application listens on
    #[serde(default)]
    pub container_port: Option<u16>,
}

impl DeploymentRequest {
    pub fn new(repo_url: impl Into<String>, deployment_mode: DeploymentMode) -> Self {
        Self {
            repo_url: repo_url.into(),
            deployment_mode,
            target_namespace: default_namespace(),
            cloud_credentials: None,
            key_name: None,
            region: None,
            cluster_name: None,
            container_port: None,
        }
    }

    /// Subprocess environment carrying the request's credentials, if any
    pub fn credential_env(&self) -> HashMap<String, String> {
        self.cloud_credentials
            .as_ref()
            .map(CloudCredentials::to_env)
            .unwrap_or_default()
    }

    /// Region to deploy in: the request's own, then the credentials', then `default`
    pub fn region_or(&self, default: &str) -> String {
        self.region
            .clone()
            .or_else(|| {
                self.cloud_credentials
                    .as_ref()
                    .and_then(|c| c.region.clone())
            })
            .unwrap_or_else(|| default.to_string())
    }
}

/// Terminal status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Error,
    PendingFeature,
}

/// The single terminal value produced for a request.
///
/// Only the constructors below build one, so a result is either a success
/// carrying outputs, an error carrying a message, or a pending feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    deployment_id: String,
    status: DeploymentStatus,
    mode: DeploymentMode,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs: Option<ProvisioningOutputs>,
    #[serde(default)]
    messages: Vec<String>,
}

impl DeploymentResult {
    pub fn success(
        deployment_id: impl Into<String>,
        mode: DeploymentMode,
        message: impl Into<String>,
        outputs: ProvisioningOutputs,
        messages: Vec<String>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            status: DeploymentStatus::Success,
            mode,
            message: message.into(),
            outputs: Some(outputs),
            messages,
        }
    }

    pub fn error(
        deployment_id: impl Into<String>,
        mode: DeploymentMode,
        message: impl Into<String>,
        messages: Vec<String>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            status: DeploymentStatus::Error,
            mode,
            message: message.into(),
            outputs: None,
            messages,
        }
    }

    pub fn pending_feature(
        deployment_id: impl Into<String>,
        mode: DeploymentMode,
        message: impl Into<String>,
        messages: Vec<String>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            status: DeploymentStatus::PendingFeature,
            mode,
            message: message.into(),
            outputs: None,
            messages,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn outputs(&self) -> Option<&ProvisioningOutputs> {
        self.outputs.as_ref()
    }

    /// Human-readable transcript of the run
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("cloud_local".parse::<DeploymentMode>().unwrap(), DeploymentMode::CloudLocal);
        assert_eq!("Cloud-Hosted".parse::<DeploymentMode>().unwrap(), DeploymentMode::CloudHosted);
        assert!("mainframe".parse::<DeploymentMode>().is_err());
    }

    #[test]
    fn test_request_deserialization_defaults() {
        let request: DeploymentRequest = serde_json::from_str(
            r#"{
                "repo_url": "https://github.com/acme/web",
                "deployment_mode": "cloud-local",
                "cloud_credentials": {"access_key_id": "AKIA1", "secret_access_key": "s3cr3t"}
            }"#,
        )
        .unwrap();

        assert_eq!(request.target_namespace, "default");
        assert!(request.key_name.is_none());
        let env = request.credential_env();
        assert_eq!(env.get("AWS_ACCESS_KEY_ID").map(String::as_str), Some("AKIA1"));
        assert_eq!(env.get("AWS_SECRET_ACCESS_KEY").map(String::as_str), Some("s3cr3t"));
        assert!(!format!("{:?}", request).contains("s3cr3t"));
    }

    #[test]
    fn test_region_precedence() {
        let mut request =
            DeploymentRequest::new("https://github.com/acme/web", DeploymentMode::CloudHosted);
        assert_eq!(request.region_or("us-east-1"), "us-east-1");

        let mut credentials = CloudCredentials::new("AKIA1", "s3cr3t");
        credentials.region = Some("eu-west-1".to_string());
        request.cloud_credentials = Some(credentials);
        assert_eq!(request.region_or("us-east-1"), "eu-west-1");

        request.region = Some("ap-south-1".to_string());
        assert_eq!(request.region_or("us-east-1"), "ap-south-1");
    }

    #[test]
    fn test_result_serialization() {
        let result = DeploymentResult::error(
            "d-1",
            DeploymentMode::Local,
            "boom",
            vec!["Starting".to_string()],
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["mode"], "local");
        assert!(json.get("outputs").is_none());

        let pending =
            DeploymentResult::pending_feature("d-2", DeploymentMode::CloudHosted, "later", vec![]);
        assert_eq!(serde_json::to_value(&pending).unwrap()["status"], "pending_feature");
    }
}
