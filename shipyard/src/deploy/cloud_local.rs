//! Cloud-local deployments: one VM running a kind cluster
//!
//! The saga provisions the VM with Terraform, then (when a private key is
//! configured) brings the cluster up over SSH and deploys the workload on
//! it. Once `apply` has run, every failure destroys the infrastructure
//! before the error is returned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::{
    acquire_kind_credentials, apply_workload_manifests, ensure_namespace, wait_for_api_server,
    ClusterClient, NamespaceState,
};
use crate::deploy::outcome::{Compensation, Failure, Outcome};
use crate::deploy::registry::{DeployContext, DeployServices, ModeDeployer};
use crate::deploy::repo::{app_name_from_url, clone_repository, dockerfile_for};
use crate::errors::EngineError;
use crate::models::{DeploymentMode, ProvisioningOutputs};
use crate::poll::{poll_until, Check, PollOutcome, PollPolicy};
use crate::provisioner::{ProvisioningContext, Provisioner};
use crate::remote::{RemoteOutput, RemoteTarget, SshExecutor};
use crate::templates::TemplateId;
use crate::utils::short_id;

const KIND_VERSION: &str = "v0.23.0";
const KUBECTL_VERSION: &str = "v1.30.2";
const BOOTSTRAP_LOG: &str = "/var/log/shipyard-bootstrap.log";
const READY_MARKER: &str = "/var/lib/shipyard/bootstrap.done";

#[derive(Serialize)]
struct BootstrapVars<'a> {
    bootstrap_log: &'a str,
    ssh_user: &'a str,
    kind_version: &'a str,
    kubectl_version: &'a str,
    node_port: u16,
    cluster_name: &'a str,
    ready_marker: &'a str,
}

#[derive(Serialize)]
struct RemoteBuildVars<'a> {
    build_dir: &'a str,
    repo_url: &'a str,
    dockerfile: Option<&'a str>,
    image: &'a str,
    cluster_name: &'a str,
}

#[derive(Serialize)]
pub(crate) struct DeploymentManifestVars<'a> {
    pub app_name: &'a str,
    pub namespace: &'a str,
    pub replicas: u32,
    pub image: &'a str,
    pub pull_policy: &'a str,
    pub container_port: u16,
}

#[derive(Serialize)]
pub(crate) struct ServiceManifestVars<'a> {
    pub app_name: &'a str,
    pub namespace: &'a str,
    pub service_type: &'a str,
    pub service_port: u16,
    pub container_port: u16,
    pub node_port: Option<u16>,
}

/// Provisions a VM, bootstraps kind on it and deploys the workload
pub struct CloudLocalDeployer {
    services: Arc<DeployServices>,
    provisioner: Provisioner,
}

impl CloudLocalDeployer {
    pub fn new(services: Arc<DeployServices>) -> Self {
        let provisioner = Provisioner::new(
            services.runner.clone(),
            services.renderer.clone(),
            &services.settings.tools.terraform,
        );
        Self {
            services,
            provisioner,
        }
    }

    /// Destroy whatever `apply` created and describe how that went
    async fn compensate(
        &self,
        ctx: &DeployContext<'_>,
        env: &HashMap<String, String>,
        error: EngineError,
    ) -> Failure {
        ctx.log.warning(format!("{}; destroying provisioned resources", error));
        let compensation = match self.provisioner.destroy(ctx.workspace, env).await {
            Ok(result) if result.ok => {
                ctx.log.info("Cleanup succeeded: provisioned resources were destroyed");
                Compensation::Succeeded {
                    what: "provisioned resources were destroyed".to_string(),
                }
            }
            Ok(result) => {
                ctx.log.diagnostic("terraform destroy stderr", &result.stderr);
                let reason = result.to_error("destroy").to_string();
                ctx.log.warning(format!(
                    "WARNING: cleanup failed ({}); resources may still exist",
                    reason
                ));
                Compensation::Failed {
                    what: "destroy provisioned resources".to_string(),
                    reason,
                }
            }
            Err(e) => {
                ctx.log.warning(format!(
                    "WARNING: cleanup failed ({}); resources may still exist",
                    e
                ));
                Compensation::Failed {
                    what: "destroy provisioned resources".to_string(),
                    reason: e.to_string(),
                }
            }
        };
        Failure::compensated(error, compensation)
    }

    fn executor(&self) -> SshExecutor {
        let settings = &self.services.settings;
        SshExecutor::new(
            self.services.runner.clone(),
            &settings.tools.ssh,
            &settings.tools.sftp,
            settings.timeouts.ssh_connect(),
        )
    }

    /// Remote command with one retry when it times out
    async fn execute_remote(
        &self,
        ctx: &DeployContext<'_>,
        executor: &SshExecutor,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, EngineError> {
        match executor.execute(target, command, timeout).await {
            Err(EngineError::Timeout { .. }) => {
                ctx.log.warning("Remote command timed out; retrying once");
                executor.execute(target, command, timeout).await
            }
            other => other,
        }
    }

    async fn wait_for_ssh(
        &self,
        executor: &SshExecutor,
        target: &RemoteTarget,
    ) -> Result<(), EngineError> {
        let timeouts = &self.services.settings.timeouts;
        let policy = PollPolicy::backoff(
            Duration::from_secs(5),
            Duration::from_secs(30),
            timeouts.ssh_ready(),
        );
        let check_timeout = timeouts.ssh_connect() + Duration::from_secs(5);

        let outcome = poll_until("SSH", &policy, tokio::time::sleep, move || async move {
            match executor.execute(target, "true", check_timeout).await {
                Ok(output) if output.success() => Check::Ready(()),
                Ok(output) => Check::Pending(format!("check exited with {:?}", output.exit_code)),
                Err(e) if e.is_retryable() => Check::Pending(e.to_string()),
                Err(e) => Check::Failed(e),
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::Failed(e) => Err(e),
            PollOutcome::TimedOut { elapsed, .. } => Err(EngineError::Timeout {
                operation: format!("SSH on {}", target.host),
                after: elapsed,
            }),
        }
    }

    async fn wait_for_bootstrap(
        &self,
        ctx: &DeployContext<'_>,
        executor: &SshExecutor,
        target: &RemoteTarget,
    ) -> Result<(), EngineError> {
        let timeouts = &self.services.settings.timeouts;
        let policy = PollPolicy::fixed(timeouts.bootstrap_interval(), timeouts.bootstrap());
        let check_timeout = timeouts.ssh_connect() + Duration::from_secs(5);
        let marker_test = format!("test -f {}", READY_MARKER);
        let marker_test = marker_test.as_str();

        let check = move || async move {
            match executor.execute(target, marker_test, check_timeout).await {
                Ok(output) if output.success() => Check::Ready(()),
                Ok(_) => Check::Pending("bootstrap still running".to_string()),
                Err(e) if e.is_retryable() => Check::Pending(e.to_string()),
                Err(e) => Check::Failed(e),
            }
        };
        let outcome = poll_until("cluster bootstrap", &policy, tokio::time::sleep, check).await;

        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::Failed(e) => Err(e),
            PollOutcome::TimedOut { elapsed, .. } => {
                self.collect_bootstrap_log(ctx, executor, target).await;
                Err(EngineError::Timeout {
                    operation: "cluster bootstrap on the VM".to_string(),
                    after: elapsed,
                })
            }
        }
    }

    /// Fetch the VM's bootstrap log into the diagnostics, best-effort
    async fn collect_bootstrap_log(
        &self,
        ctx: &DeployContext<'_>,
        executor: &SshExecutor,
        target: &RemoteTarget,
    ) {
        let local = ctx.workspace.subdir("diagnostics").file("bootstrap.log");
        match executor.download_file(target, BOOTSTRAP_LOG, local.path()).await {
            Ok(()) => {
                if let Ok(contents) = local.read_string().await {
                    let tail: Vec<&str> = contents.lines().rev().take(40).collect();
                    let tail: Vec<&str> = tail.into_iter().rev().collect();
                    ctx.log.diagnostic("bootstrap log", &tail.join("\n"));
                }
            }
            Err(e) => warn!("Could not fetch bootstrap log: {}", e),
        }
    }

    /// Everything after a successful apply: cluster bring-up and workload
    async fn bring_up(
        &self,
        ctx: &DeployContext<'_>,
        public_ip: &str,
        key_path: PathBuf,
    ) -> Result<ProvisioningOutputs, EngineError> {
        let settings = &self.services.settings;
        let cloud_local = &settings.cloud_local;
        let executor = self.executor();
        let target = RemoteTarget::new(public_ip, &cloud_local.ssh_user, key_path);

        ctx.log.info(format!("Waiting for SSH on {}", public_ip));
        self.wait_for_ssh(&executor, &target).await?;

        ctx.log.info("Waiting for the kind cluster bootstrap to finish");
        self.wait_for_bootstrap(ctx, &executor, &target).await?;

        let app = app_name_from_url(&ctx.request.repo_url);
        let container_port = ctx.request.container_port.unwrap_or(settings.local.container_port);
        let dockerfile = self.prepare_dockerfile(ctx, container_port).await?;
        let image = format!("shipyard/{}:{}", app, short_id());
        let remote_dir = format!("/tmp/shipyard-{}", ctx.deployment_id);
        let script = self.services.renderer.render(
            TemplateId::RemoteBuild,
            &RemoteBuildVars {
                build_dir: &format!("{}/src", remote_dir),
                repo_url: &ctx.request.repo_url,
                dockerfile: dockerfile.as_deref(),
                image: &image,
                cluster_name: &cloud_local.kind_cluster_name,
            },
        )?;
        let local_script = ctx.workspace.file("remote_build.sh");
        local_script.write_string(&script).await?;
        let remote_script = format!("/tmp/shipyard-build-{}.sh", ctx.deployment_id);

        ctx.log.info(format!("Building image {} on the VM", image));
        executor
            .upload_file(&target, local_script.path(), &remote_script)
            .await?;
        let built = self
            .execute_remote(
                ctx,
                &executor,
                &target,
                &format!("bash {}", remote_script),
                settings.timeouts.remote_command(),
            )
            .await?;
        if !built.success() {
            ctx.log.diagnostic("remote build stderr", &built.stderr);
            return Err(EngineError::execution("remote image build", built.exit_code));
        }

        let handle = acquire_kind_credentials(
            &executor,
            &target,
            &cloud_local.kind_cluster_name,
            &self.services.layout.credentials_dir(),
            settings.timeouts.ssh_connect() + Duration::from_secs(50),
        )
        .await?;
        let client = ClusterClient::new(
            self.services.runner.clone(),
            &settings.tools.kubectl,
            &settings.tools.aws,
        );

        let deployed = async {
            ctx.log.info("Waiting for the Kubernetes API server");
            let policy = PollPolicy::backoff(
                settings.timeouts.api_initial_interval(),
                settings.timeouts.api_max_interval(),
                settings.timeouts.api_server(),
            );
            if !wait_for_api_server(&client, &handle, &policy, tokio::time::sleep).await {
                return Err(EngineError::Timeout {
                    operation: "the Kubernetes API server".to_string(),
                    after: settings.timeouts.api_server(),
                });
            }

            let namespace = &ctx.request.target_namespace;
            if ensure_namespace(&client, &handle, namespace).await? == NamespaceState::Created {
                ctx.log.info(format!("Created namespace {}", namespace));
            }

            let manifests = vec![
                self.services.renderer.render(
                    TemplateId::K8sDeployment,
                    &DeploymentManifestVars {
                        app_name: &app,
                        namespace,
                        replicas: 1,
                        image: &image,
                        pull_policy: "IfNotPresent",
                        container_port,
                    },
                )?,
                self.services.renderer.render(
                    TemplateId::K8sService,
                    &ServiceManifestVars {
                        app_name: &app,
                        namespace,
                        service_type: "NodePort",
                        service_port: container_port,
                        container_port,
                        node_port: Some(cloud_local.node_port),
                    },
                )?,
            ];
            ctx.log.info(format!("Applying workload manifests in {}", namespace));
            apply_workload_manifests(&client, &handle, &manifests, namespace, ctx.workspace).await?;
            Ok::<(), EngineError>(())
        }
        .await;

        if let Err(e) = handle.release().await {
            warn!("Failed to release kubeconfig: {}", e);
        }
        deployed?;

        Ok(ProvisioningOutputs::new()
            .with("kubernetes_api", format!("https://{}:6443", public_ip))
            .with("namespace", ctx.request.target_namespace.clone())
            .with("image", image)
            .with("app_url", format!("http://{}:{}", public_ip, cloud_local.node_port)))
    }

    /// Clone locally to decide whether the VM build needs a generated Dockerfile
    async fn prepare_dockerfile(
        &self,
        ctx: &DeployContext<'_>,
        container_port: u16,
    ) -> Result<Option<String>, EngineError> {
        let source = ctx.workspace.subdir("src");
        clone_repository(
            &self.services.runner,
            &self.services.settings.tools.git,
            &ctx.request.repo_url,
            source.path(),
        )
        .await?;
        let analysis = self.services.analyzer.analyze(source.path()).await?;
        let dockerfile = dockerfile_for(&self.services.renderer, &analysis, container_port)?;
        if dockerfile.is_some() {
            ctx.log.info("No Dockerfile found; generated one from the README");
        }
        Ok(dockerfile)
    }
}

#[async_trait]
impl ModeDeployer for CloudLocalDeployer {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::CloudLocal
    }

    async fn deploy(&self, ctx: &DeployContext<'_>) -> Result<Outcome, Failure> {
        let settings = &self.services.settings.cloud_local;
        let env = ctx.request.credential_env();
        let region = ctx.request.region_or(&settings.region);
        let key_name = ctx
            .request
            .key_name
            .clone()
            .or_else(|| settings.key_name.clone());
        let resource_name = format!("shipyard-{}", short_id());

        let bootstrap_script = self.services.renderer.render(
            TemplateId::BootstrapKind,
            &BootstrapVars {
                bootstrap_log: BOOTSTRAP_LOG,
                ssh_user: &settings.ssh_user,
                kind_version: KIND_VERSION,
                kubectl_version: KUBECTL_VERSION,
                node_port: settings.node_port,
                cluster_name: &settings.kind_cluster_name,
                ready_marker: READY_MARKER,
            },
        )?;
        let context = ProvisioningContext {
            region: Some(region.clone()),
            machine_image: Some(settings.ami.clone()),
            instance_type: Some(settings.instance_type.clone()),
            key_name,
            resource_name: Some(resource_name.clone()),
            node_port: settings.node_port,
            bootstrap_script,
            ..Default::default()
        };

        ctx.log.info(format!(
            "Generating infrastructure configuration for {} in {}",
            resource_name, region
        ));
        self.provisioner
            .generate_config(ctx.workspace, &context)
            .await?;

        ctx.log.info("Running terraform init");
        let init = self.provisioner.init(ctx.workspace, &env).await?;
        if !init.ok {
            ctx.log.diagnostic("terraform init stderr", &init.stderr);
            return Err(init.to_error("init").into());
        }

        ctx.log.info("Running terraform apply");
        let applied = match self.provisioner.apply(ctx.workspace, &env).await {
            Ok(applied) => applied,
            Err(e) => return Err(self.compensate(ctx, &env, e).await),
        };
        if !applied.ok {
            ctx.log.diagnostic("terraform apply stderr", &applied.stderr);
            return Err(self.compensate(ctx, &env, applied.to_error()).await);
        }
        if applied.outputs_unavailable {
            ctx.log.warning("Infrastructure was created but its outputs could not be read");
        }

        let outputs = applied.outputs;
        let public_ip = outputs.get("public_ip").map(str::to_string);
        let Some(public_ip) = public_ip else {
            return Ok(Outcome::Success {
                message: format!("Provisioned {}; no public address was reported", resource_name),
                outputs,
            });
        };
        ctx.log.info(format!("VM {} is up at {}", resource_name, public_ip));

        let Some(key_path) = settings.private_key_path.clone() else {
            ctx.log.info("No private key configured; skipping cluster bring-up");
            return Ok(Outcome::Success {
                message: format!(
                    "Provisioned VM at {}; kind bootstrap is running on first boot",
                    public_ip
                ),
                outputs,
            });
        };

        match self.bring_up(ctx, &public_ip, key_path).await {
            Ok(workload) => {
                info!("Cloud-local deployment on {} complete", public_ip);
                let outputs = outputs.merged(&workload);
                let url = outputs.get("app_url").unwrap_or_default().to_string();
                Ok(Outcome::Success {
                    message: format!("Deployed to kind on {}; application at {}", public_ip, url),
                    outputs,
                })
            }
            Err(e) => Err(self.compensate(ctx, &env, e).await),
        }
    }
}
