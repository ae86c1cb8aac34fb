//! Kubeconfig acquisition
//!
//! Self-managed (kind) clusters export their kubeconfig on the VM; managed
//! clusters get a synthesized kubeconfig whose user authenticates through
//! the cloud CLI's token exchange, so no static credential is embedded.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::client::ClusterClient;
use crate::cluster::handle::ClusterHandle;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::remote::{RemoteTarget, SshExecutor};
use crate::templates::{Renderer, TemplateId};

/// API server port kind is configured to listen on
pub const KIND_API_PORT: u16 = 6443;

/// Export the kind kubeconfig from the VM and point it at the public address
pub async fn acquire_kind_credentials(
    executor: &SshExecutor,
    target: &RemoteTarget,
    cluster_name: &str,
    credentials_dir: &Dir,
    timeout: Duration,
) -> Result<ClusterHandle, EngineError> {
    let command = format!("sudo kind get kubeconfig --name {}", cluster_name);
    let output = executor.execute(target, &command, timeout).await?;
    if !output.success() {
        warn!("kind get kubeconfig on {}: {}", target.host, output.stderr.trim());
        return Err(EngineError::execution("kind get kubeconfig", output.exit_code));
    }
    if !output.stdout.contains("server:") {
        return Err(EngineError::decode("kind get kubeconfig", "no cluster server entry"));
    }

    let server = format!("https://{}:{}", target.host, KIND_API_PORT);
    let kubeconfig = rewrite_server(&output.stdout, &server);
    let handle = ClusterHandle::create(credentials_dir, cluster_name, &kubeconfig).await?;
    info!("Acquired kubeconfig for kind cluster {} on {}", cluster_name, target.host);
    Ok(handle)
}

/// Replace every `server:` entry with `server`, keeping indentation
pub fn rewrite_server(kubeconfig: &str, server: &str) -> String {
    let mut out = String::with_capacity(kubeconfig.len());
    for line in kubeconfig.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("server:") {
            let indent = &line[..line.len() - trimmed.len()];
            out.push_str(indent);
            out.push_str("server: ");
            out.push_str(server);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Deserialize)]
struct DescribeCluster {
    cluster: ManagedCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedCluster {
    endpoint: Option<String>,
    certificate_authority: Option<CertificateAuthority>,
}

#[derive(Debug, Deserialize)]
struct CertificateAuthority {
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct ManagedKubeconfigVars<'a> {
    cluster_name: &'a str,
    endpoint: &'a str,
    ca_data: &'a str,
    aws_binary: &'a str,
    region: &'a str,
}

/// Synthesize an exec-authenticated kubeconfig for a managed cluster
pub async fn acquire_managed_credentials(
    client: &ClusterClient,
    renderer: &Renderer,
    cluster_name: &str,
    credentials_dir: &Dir,
) -> Result<ClusterHandle, EngineError> {
    let region = client
        .region()
        .ok_or(EngineError::MissingField { field: "Region" })?
        .to_string();

    let output = client
        .aws(
            &["eks", "describe-cluster", "--name", cluster_name, "--output", "json"],
            Duration::from_secs(60),
        )
        .await?;
    if !output.success() {
        warn!("describe-cluster {}: {}", cluster_name, output.stderr.trim());
        return Err(EngineError::execution("aws eks describe-cluster", output.exit_code));
    }

    let described: DescribeCluster = serde_json::from_str(&output.stdout)
        .map_err(|e| EngineError::decode("aws eks describe-cluster", e))?;
    let endpoint = described
        .cluster
        .endpoint
        .filter(|e| !e.is_empty())
        .ok_or_else(|| EngineError::decode("aws eks describe-cluster", "cluster has no endpoint"))?;
    let ca_data = described
        .cluster
        .certificate_authority
        .and_then(|ca| ca.data)
        .ok_or_else(|| {
            EngineError::decode("aws eks describe-cluster", "cluster has no certificate authority")
        })?;
    base64::engine::general_purpose::STANDARD
        .decode(ca_data.trim())
        .map_err(|e| EngineError::decode("cluster certificate authority", e))?;

    let kubeconfig = renderer.render(
        TemplateId::ManagedKubeconfig,
        &ManagedKubeconfigVars {
            cluster_name,
            endpoint: &endpoint,
            ca_data: ca_data.trim(),
            aws_binary: client.aws_binary(),
            region: &region,
        },
    )?;

    let handle = ClusterHandle::create(credentials_dir, cluster_name, &kubeconfig).await?;
    info!("Acquired kubeconfig for managed cluster {}", cluster_name);
    Ok(handle)
}
