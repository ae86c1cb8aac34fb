//! kubectl and cloud CLI invocations against one cluster

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::cluster::handle::ClusterHandle;
use crate::errors::EngineError;
use crate::process::{CommandRunner, ProcessCommand, ProcessOutput};

/// Runs `kubectl` (and the cloud CLI for lookups) with a fixed environment
#[derive(Clone)]
pub struct ClusterClient {
    runner: Arc<dyn CommandRunner>,
    kubectl: String,
    aws: String,
    env: HashMap<String, String>,
    region: Option<String>,
}

impl ClusterClient {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        kubectl: impl Into<String>,
        aws: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
            aws: aws.into(),
            env: HashMap::new(),
            region: None,
        }
    }

    /// Environment for every invocation, e.g. credentials for exec-based auth
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn aws_binary(&self) -> &str {
        &self.aws
    }

    /// `kubectl --kubeconfig <handle> <args>`
    pub async fn kubectl(
        &self,
        handle: &ClusterHandle,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ProcessOutput, EngineError> {
        let command = ProcessCommand::new(&self.kubectl)
            .arg("--kubeconfig")
            .arg(handle.path().display().to_string())
            .args(args.iter().copied())
            .envs(&self.env)
            .timeout(timeout);
        debug!("kubectl {}", args.join(" "));
        self.runner.run(command).await
    }

    /// `aws <args>` with the configured region appended when set
    pub async fn aws(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ProcessOutput, EngineError> {
        let mut command = ProcessCommand::new(&self.aws)
            .args(args.iter().copied())
            .envs(&self.env)
            .timeout(timeout);
        if let Some(region) = &self.region {
            command = command.arg("--region").arg(region);
        }
        self.runner.run(command).await
    }

    /// Hosted zone of the cloud load balancer serving `hostname`.
    ///
    /// Best-effort: any failure yields `None`.
    pub async fn lookup_hosted_zone_id(&self, hostname: &str) -> Option<String> {
        let output = match self
            .aws(
                &["elbv2", "describe-load-balancers", "--output", "json"],
                Duration::from_secs(60),
            )
            .await
        {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!("Load balancer lookup exited with {:?}", output.exit_code);
                return None;
            }
            Err(e) => {
                debug!("Load balancer lookup failed: {}", e);
                return None;
            }
        };

        let parsed: DescribeLoadBalancers = serde_json::from_str(&output.stdout).ok()?;
        parsed
            .load_balancers
            .into_iter()
            .find(|lb| lb.dns_name.eq_ignore_ascii_case(hostname))
            .and_then(|lb| lb.canonical_hosted_zone_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeLoadBalancers {
    #[serde(default)]
    load_balancers: Vec<LoadBalancerDescription>,
}

#[derive(Debug, Deserialize)]
struct LoadBalancerDescription {
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(rename = "CanonicalHostedZoneId", default)]
    canonical_hosted_zone_id: Option<String>,
}
