//! Entry point for one deployment run

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use crate::deploy::message_log::DeploymentMessageLog;
use crate::deploy::outcome::Outcome;
use crate::deploy::registry::{DeployContext, DeployerRegistry};
use crate::deploy::workspace::ProvisioningWorkspace;
use crate::errors::EngineError;
use crate::models::{DeploymentRequest, DeploymentResult};
use crate::storage::StorageLayout;
use crate::utils::generate_uuid;

/// Dispatches requests to the deployer registered for their mode.
///
/// Every call produces exactly one [`DeploymentResult`]; errors and panics
/// inside a deployer are converted, never propagated.
#[derive(Clone)]
pub struct Orchestrator {
    registry: DeployerRegistry,
    layout: StorageLayout,
}

impl Orchestrator {
    pub fn new(registry: DeployerRegistry, layout: StorageLayout) -> Self {
        Self { registry, layout }
    }

    pub fn registry(&self) -> &DeployerRegistry {
        &self.registry
    }

    pub async fn deploy(&self, request: DeploymentRequest) -> DeploymentResult {
        let deployment_id = generate_uuid();
        let span = info_span!(
            "deployment",
            deployment_id = %deployment_id,
            mode = %request.deployment_mode
        );
        self.run(deployment_id, request).instrument(span).await
    }

    async fn run(&self, deployment_id: String, request: DeploymentRequest) -> DeploymentResult {
        let mode = request.deployment_mode;
        let log = DeploymentMessageLog::new(&deployment_id);
        log.info(format!("Starting {} deployment of {}", mode, request.repo_url));

        if let Err(e) = validate_repo_url(&request.repo_url) {
            log.warning(e.to_string());
            return DeploymentResult::error(deployment_id, mode, e.to_string(), log.transcript());
        }

        let Some(deployer) = self.registry.get(mode) else {
            let message = format!("Deployment mode {} is not available yet", mode);
            log.info(message.clone());
            return DeploymentResult::pending_feature(
                deployment_id,
                mode,
                message,
                log.transcript(),
            );
        };

        let workspaces = self.layout.workspaces_dir();
        let workspace = match ProvisioningWorkspace::create(&workspaces, &deployment_id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("Failed to create workspace: {}", e);
                let message = e.to_string();
                return DeploymentResult::error(deployment_id, mode, message, log.transcript());
            }
        };

        let ctx = DeployContext {
            deployment_id: &deployment_id,
            request: &request,
            workspace: workspace.dir(),
            log: &log,
        };
        let finished = AssertUnwindSafe(deployer.deploy(&ctx)).catch_unwind().await;

        if let Err(e) = workspace.release().await {
            warn!("Failed to remove workspace: {}", e);
        }

        match finished {
            Ok(Ok(Outcome::Success { message, outputs })) => {
                info!("Deployment succeeded");
                DeploymentResult::success(deployment_id, mode, message, outputs, log.transcript())
            }
            Ok(Ok(Outcome::PendingFeature { message })) => {
                DeploymentResult::pending_feature(deployment_id, mode, message, log.transcript())
            }
            Ok(Err(failure)) => {
                let message = failure.message();
                error!(kind = ?failure.error.kind(), "Deployment failed: {}", message);
                DeploymentResult::error(deployment_id, mode, message, log.transcript())
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!("Deployer panicked: {}", reason);
                let message =
                    EngineError::Internal(format!("deployment aborted unexpectedly: {}", reason))
                        .to_string();
                DeploymentResult::error(deployment_id, mode, message, log.transcript())
            }
        }
    }
}

/// Accepts http(s), ssh and git URLs as well as scp-style `git@host:path`
fn validate_repo_url(repo_url: &str) -> Result<(), EngineError> {
    let repo_url = repo_url.trim();
    if repo_url.is_empty() {
        return Err(EngineError::MissingField { field: "Repository URL" });
    }
    if repo_url.starts_with("git@") {
        return Ok(());
    }
    match url::Url::parse(repo_url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https" | "ssh" | "git" | "file") => {
            Ok(())
        }
        Ok(parsed) => Err(EngineError::Configuration(format!(
            "unsupported repository URL scheme: {}",
            parsed.scheme()
        ))),
        Err(e) => Err(EngineError::Configuration(format!("invalid repository URL: {}", e))),
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
