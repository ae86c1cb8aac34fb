//! Cluster readiness operations
//!
//! Waits take the sleep function as a parameter so callers (and tests)
//! decide how time passes.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::cluster::client::ClusterClient;
use crate::cluster::handle::ClusterHandle;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::poll::{poll_until, Check, PollOutcome, PollPolicy};

/// Per-check limit so one hung request cannot eat the whole budget
const CHECK_TIMEOUT: Duration = Duration::from_secs(15);

const APPLY_TIMEOUT: Duration = Duration::from_secs(180);

/// Poll a read-only endpoint until the API server answers.
///
/// Returns `false` when the budget runs out; that is an expected outcome,
/// not an error.
pub async fn wait_for_api_server<S, F>(
    client: &ClusterClient,
    handle: &ClusterHandle,
    policy: &PollPolicy,
    sleep_fn: S,
) -> bool
where
    S: FnMut(Duration) -> F,
    F: Future<Output = ()>,
{
    let outcome = poll_until("API server", policy, sleep_fn, move || async move {
        match client
            .kubectl(
                handle,
                &["get", "--raw", "/readyz", "--request-timeout=5s"],
                CHECK_TIMEOUT,
            )
            .await
        {
            Ok(output) if output.success() => Check::Ready(()),
            Ok(output) => Check::Pending(format!("readyz exited with {:?}", output.exit_code)),
            Err(e @ EngineError::ToolNotFound { .. }) => Check::Failed(e),
            Err(e) => Check::Pending(e.to_string()),
        }
    })
    .await;

    match outcome {
        PollOutcome::Ready(()) => {
            info!("API server for {} is ready", handle.cluster_name());
            true
        }
        PollOutcome::TimedOut { elapsed, .. } => {
            warn!(
                "API server for {} not ready after {:?}",
                handle.cluster_name(),
                elapsed
            );
            false
        }
        PollOutcome::Failed(e) => {
            error!("API server wait for {} failed: {}", handle.cluster_name(), e);
            false
        }
    }
}

/// What [`ensure_namespace`] found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceState {
    AlreadyExisted,
    Created,
}

/// Create `name` unless it exists.
///
/// Only a not-found check leads to creation; any other check failure is
/// returned as an error.
pub async fn ensure_namespace(
    client: &ClusterClient,
    handle: &ClusterHandle,
    name: &str,
) -> Result<NamespaceState, EngineError> {
    let check = client
        .kubectl(handle, &["get", "namespace", name, "-o", "name"], CHECK_TIMEOUT)
        .await?;
    if check.success() {
        return Ok(NamespaceState::AlreadyExisted);
    }
    if !is_not_found(&check.stderr) {
        warn!("Namespace check for {} failed: {}", name, check.stderr.trim());
        return Err(EngineError::execution("kubectl get namespace", check.exit_code));
    }

    let created = client
        .kubectl(handle, &["create", "namespace", name], CHECK_TIMEOUT)
        .await?;
    if created.success() {
        info!("Created namespace {}", name);
        return Ok(NamespaceState::Created);
    }
    // created concurrently by someone else
    if created.stderr.contains("AlreadyExists") {
        return Ok(NamespaceState::AlreadyExisted);
    }
    warn!("Creating namespace {} failed: {}", name, created.stderr.trim());
    Err(EngineError::execution("kubectl create namespace", created.exit_code))
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

/// External address assigned to a load-balanced service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerAddress {
    pub hostname: String,
    pub zone_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceDoc {
    #[serde(default)]
    status: ServiceStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    #[serde(default)]
    load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancerStatus {
    #[serde(default)]
    ingress: Vec<IngressPoint>,
}

#[derive(Debug, Deserialize)]
struct IngressPoint {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

/// Read the assigned address out of a `kubectl get service -o json` document
fn parse_service_address(raw: &str) -> Result<Option<String>, EngineError> {
    let doc: ServiceDoc =
        serde_json::from_str(raw).map_err(|e| EngineError::decode("kubectl get service", e))?;
    Ok(doc
        .status
        .load_balancer
        .ingress
        .into_iter()
        .find_map(|point| {
            point
                .hostname
                .filter(|h| !h.trim().is_empty())
                .or(point.ip.filter(|ip| !ip.trim().is_empty()))
        }))
}

/// Poll a service until the cloud assigns it an external address.
///
/// Not-found and empty-address reads are retried until the budget runs out,
/// which yields `Ok(None)`. An undecodable read returns its error at once.
pub async fn wait_for_load_balancer_address<S, F>(
    client: &ClusterClient,
    handle: &ClusterHandle,
    service: &str,
    namespace: &str,
    policy: &PollPolicy,
    sleep_fn: S,
) -> Result<Option<LoadBalancerAddress>, EngineError>
where
    S: FnMut(Duration) -> F,
    F: Future<Output = ()>,
{
    let outcome = poll_until("load balancer", policy, sleep_fn, move || async move {
        let output = match client
            .kubectl(
                handle,
                &["get", "service", service, "-n", namespace, "-o", "json"],
                CHECK_TIMEOUT,
            )
            .await
        {
            Ok(output) => output,
            Err(e @ EngineError::ToolNotFound { .. }) => return Check::Failed(e),
            Err(e) => return Check::Pending(e.to_string()),
        };

        if !output.success() {
            return if is_not_found(&output.stderr) {
                Check::Pending(format!("service {} not found", service))
            } else {
                Check::Pending(format!("kubectl exited with {:?}", output.exit_code))
            };
        }

        match parse_service_address(&output.stdout) {
            Ok(Some(hostname)) => Check::Ready(hostname),
            Ok(None) => Check::Pending("no external address assigned yet".to_string()),
            Err(e) => Check::Failed(e),
        }
    })
    .await;

    match outcome {
        PollOutcome::Ready(hostname) => {
            info!("Service {}/{} reachable at {}", namespace, service, hostname);
            let zone_id = client.lookup_hosted_zone_id(&hostname).await;
            Ok(Some(LoadBalancerAddress { hostname, zone_id }))
        }
        PollOutcome::TimedOut {
            elapsed,
            last_observation,
        } => {
            warn!(
                "No address for {}/{} after {:?} (last seen: {})",
                namespace,
                service,
                elapsed,
                last_observation.as_deref().unwrap_or("nothing")
            );
            Ok(None)
        }
        PollOutcome::Failed(e) => Err(e),
    }
}

/// Write `manifests` to the workspace and apply them in `namespace`.
///
/// The namespace must already exist. Returns the applied file so the caller
/// can delete the same objects when compensating.
pub async fn apply_workload_manifests(
    client: &ClusterClient,
    handle: &ClusterHandle,
    manifests: &[String],
    namespace: &str,
    workspace: &Dir,
) -> Result<PathBuf, EngineError> {
    if manifests.is_empty() {
        return Err(EngineError::Configuration("no manifests to apply".to_string()));
    }

    let file = workspace.subdir("manifests").file("workload.yaml");
    let body = manifests
        .iter()
        .map(|m| m.trim_end())
        .collect::<Vec<_>>()
        .join("\n---\n");
    file.write_string(&format!("{}\n", body)).await?;

    let path = file.path().display().to_string();
    let output = client
        .kubectl(handle, &["apply", "-n", namespace, "-f", &path], APPLY_TIMEOUT)
        .await?;
    if !output.success() {
        warn!("kubectl apply in {}: {}", namespace, output.stderr.trim());
        return Err(EngineError::execution("kubectl apply", output.exit_code));
    }

    info!("Applied {} manifest(s) in namespace {}", manifests.len(), namespace);
    Ok(file.path().to_path_buf())
}

/// Delete what [`apply_workload_manifests`] created
pub async fn delete_workload_manifests(
    client: &ClusterClient,
    handle: &ClusterHandle,
    manifest_file: &std::path::Path,
    namespace: &str,
) -> Result<(), EngineError> {
    let path = manifest_file.display().to_string();
    let output = client
        .kubectl(
            handle,
            &["delete", "-n", namespace, "-f", &path, "--ignore-not-found"],
            APPLY_TIMEOUT,
        )
        .await?;
    if !output.success() {
        return Err(EngineError::execution("kubectl delete", output.exit_code));
    }
    Ok(())
}
