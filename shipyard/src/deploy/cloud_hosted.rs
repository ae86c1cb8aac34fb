//! Cloud-hosted deployments onto an existing managed cluster

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cluster::{
    acquire_managed_credentials, apply_workload_manifests, delete_workload_manifests,
    ensure_namespace, wait_for_api_server, wait_for_load_balancer_address, ClusterClient,
    ClusterHandle, NamespaceState,
};
use crate::deploy::cloud_local::{DeploymentManifestVars, ServiceManifestVars};
use crate::deploy::image::ImageBuilder;
use crate::deploy::outcome::{Compensation, Failure, Outcome};
use crate::deploy::registry::{DeployContext, DeployServices, ModeDeployer};
use crate::deploy::repo::{app_name_from_url, clone_repository, dockerfile_for};
use crate::errors::EngineError;
use crate::models::{DeploymentMode, ProvisioningOutputs};
use crate::poll::PollPolicy;
use crate::templates::TemplateId;
use crate::utils::short_id;

const SERVICE_PORT: u16 = 80;

/// Builds, pushes and deploys behind a cloud load balancer
pub struct CloudHostedDeployer {
    services: Arc<DeployServices>,
}

impl CloudHostedDeployer {
    pub fn new(services: Arc<DeployServices>) -> Self {
        Self { services }
    }

    /// Wait for the API, apply manifests and wait for the load balancer.
    ///
    /// On failure after the manifests were applied, returns their file so
    /// the caller can delete the objects.
    async fn roll_out(
        &self,
        ctx: &DeployContext<'_>,
        client: &ClusterClient,
        handle: &ClusterHandle,
        app: &str,
        image: &str,
        container_port: u16,
    ) -> Result<ProvisioningOutputs, (EngineError, Option<PathBuf>)> {
        let timeouts = &self.services.settings.timeouts;
        let namespace = ctx.request.target_namespace.as_str();

        ctx.log.info("Waiting for the Kubernetes API server");
        let api_policy = PollPolicy::backoff(
            timeouts.api_initial_interval(),
            timeouts.api_max_interval(),
            timeouts.api_server(),
        );
        if !wait_for_api_server(client, handle, &api_policy, tokio::time::sleep).await {
            return Err((
                EngineError::Timeout {
                    operation: "the Kubernetes API server".to_string(),
                    after: timeouts.api_server(),
                },
                None,
            ));
        }

        match ensure_namespace(client, handle, namespace).await {
            Ok(NamespaceState::Created) => ctx.log.info(format!("Created namespace {}", namespace)),
            Ok(NamespaceState::AlreadyExisted) => {}
            Err(e) => return Err((e, None)),
        }

        let manifests = self
            .render_manifests(app, namespace, image, container_port)
            .map_err(|e| (e, None))?;
        ctx.log.info(format!("Applying workload manifests in {}", namespace));
        let applied = apply_workload_manifests(client, handle, &manifests, namespace, ctx.workspace)
            .await
            .map_err(|e| (e, None))?;

        ctx.log.info("Waiting for the load balancer address");
        let lb_policy =
            PollPolicy::fixed(timeouts.load_balancer_interval(), timeouts.load_balancer());
        let address = match wait_for_load_balancer_address(
            client,
            handle,
            app,
            namespace,
            &lb_policy,
            tokio::time::sleep,
        )
        .await
        {
            Ok(Some(address)) => address,
            Ok(None) => {
                return Err((
                    EngineError::Timeout {
                        operation: format!("a load balancer address for service {}", app),
                        after: timeouts.load_balancer(),
                    },
                    Some(applied),
                ))
            }
            Err(e) => return Err((e, Some(applied))),
        };

        let mut outputs = ProvisioningOutputs::new()
            .with("cluster_name", handle.cluster_name().to_string())
            .with("namespace", namespace.to_string())
            .with("image", image.to_string())
            .with("load_balancer_hostname", address.hostname.clone())
            .with("app_url", format!("http://{}", address.hostname));
        if let Some(zone_id) = address.zone_id {
            outputs = outputs.with("load_balancer_zone_id", zone_id);
        }
        Ok(outputs)
    }

    fn render_manifests(
        &self,
        app: &str,
        namespace: &str,
        image: &str,
        container_port: u16,
    ) -> Result<Vec<String>, EngineError> {
        let renderer = &self.services.renderer;
        Ok(vec![
            renderer.render(
                TemplateId::K8sDeployment,
                &DeploymentManifestVars {
                    app_name: app,
                    namespace,
                    replicas: 2,
                    image,
                    pull_policy: "Always",
                    container_port,
                },
            )?,
            renderer.render(
                TemplateId::K8sService,
                &ServiceManifestVars {
                    app_name: app,
                    namespace,
                    service_type: "LoadBalancer",
                    service_port: SERVICE_PORT,
                    container_port,
                    node_port: None,
                },
            )?,
        ])
    }
}

#[async_trait]
impl ModeDeployer for CloudHostedDeployer {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::CloudHosted
    }

    async fn deploy(&self, ctx: &DeployContext<'_>) -> Result<Outcome, Failure> {
        let settings = &self.services.settings;
        let hosted = &settings.cloud_hosted;

        let Some(cluster_name) = ctx
            .request
            .cluster_name
            .clone()
            .or_else(|| hosted.cluster_name.clone())
        else {
            ctx.log.info("No managed cluster is configured");
            return Ok(Outcome::PendingFeature {
                message: "Cloud-hosted deployment needs an existing managed cluster; \
                          creating one is not supported yet"
                    .to_string(),
            });
        };
        let registry = hosted.registry.clone().ok_or_else(|| {
            EngineError::Configuration(
                "cloud_hosted.registry is required for cloud-hosted deployments".to_string(),
            )
        })?;
        let region = ctx.request.region_or(&hosted.region);
        let env = ctx.request.credential_env();

        let app = app_name_from_url(&ctx.request.repo_url);
        let container_port = ctx.request.container_port.unwrap_or(settings.local.container_port);

        let source = ctx.workspace.subdir("src");
        ctx.log.info(format!("Cloning {}", ctx.request.repo_url));
        clone_repository(
            &self.services.runner,
            &settings.tools.git,
            &ctx.request.repo_url,
            source.path(),
        )
        .await?;
        let analysis = self.services.analyzer.analyze(source.path()).await?;
        let dockerfile = match dockerfile_for(&self.services.renderer, &analysis, container_port)? {
            Some(contents) => {
                ctx.log.info("No Dockerfile found; generated one from the README");
                let file = ctx.workspace.file("Dockerfile.generated");
                file.write_string(&contents).await?;
                Some(file.path().to_path_buf())
            }
            None => None,
        };

        let image = format!("{}:{}-{}", registry.trim_end_matches('/'), app, short_id());
        let builder = ImageBuilder::new(
            self.services.runner.clone(),
            &settings.tools.docker,
            &settings.tools.aws,
        );
        ctx.log.info(format!("Building image {}", image));
        builder
            .build_image(source.path(), &image, dockerfile.as_deref(), ctx.log)
            .await?;
        ctx.log.info("Logging in to the image registry");
        builder.registry_login(&registry, &region, &env).await?;
        ctx.log.info(format!("Pushing {}", image));
        builder.push_image(&image, ctx.log).await?;

        let client = ClusterClient::new(
            self.services.runner.clone(),
            &settings.tools.kubectl,
            &settings.tools.aws,
        )
        .with_env(env)
            .with_region(&region);
        let handle = acquire_managed_credentials(
            &client,
            &self.services.renderer,
            &cluster_name,
            &self.services.layout.credentials_dir(),
        )
        .await?;

        let rolled_out = self
            .roll_out(ctx, &client, &handle, &app, &image, container_port)
            .await;

        let result = match rolled_out {
            Ok(outputs) => {
                let hostname = outputs
                    .get("load_balancer_hostname")
                    .unwrap_or_default()
                    .to_string();
                ctx.log.info(format!("Application is reachable at http://{}", hostname));
                Ok(Outcome::Success {
                    message: format!(
                        "Deployed {} to {}; reachable at http://{}",
                        app, cluster_name, hostname
                    ),
                    outputs,
                })
            }
            Err((error, None)) => Err(Failure::from(error)),
            Err((error, Some(applied))) => {
                ctx.log.warning(format!("{}; deleting workload objects", error));
                let namespace = ctx.request.target_namespace.as_str();
                let deleted =
                    delete_workload_manifests(&client, &handle, &applied, namespace).await;
                let compensation = match deleted {
                    Ok(()) => {
                        ctx.log.info("Cleanup succeeded: workload objects were deleted");
                        Compensation::Succeeded {
                            what: "workload objects were deleted".to_string(),
                        }
                    }
                    Err(e) => {
                        ctx.log
                            .warning(format!("WARNING: could not delete workload objects: {}", e));
                        Compensation::Failed {
                            what: "delete workload objects".to_string(),
                            reason: e.to_string(),
                        }
                    }
                };
                Err(Failure::compensated(error, compensation))
            }
        };

        if let Err(e) = handle.release().await {
            warn!("Failed to release kubeconfig: {}", e);
        }
        result
    }
}
