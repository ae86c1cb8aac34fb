//! Local container runtime deployments

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::deploy::image::ImageBuilder;
use crate::deploy::outcome::{Compensation, Failure, Outcome};
use crate::deploy::registry::{DeployContext, DeployServices, ModeDeployer};
use crate::deploy::repo::{app_name_from_url, clone_repository, dockerfile_for};
use crate::errors::EngineError;
use crate::models::{DeploymentMode, ProvisioningOutputs};
use crate::process::{ProcessCommand, ProcessOutput};
use crate::utils::short_id;

const DOCKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Clones, builds and runs the repository as a detached local container
pub struct LocalDeployer {
    services: Arc<DeployServices>,
}

impl LocalDeployer {
    pub fn new(services: Arc<DeployServices>) -> Self {
        Self { services }
    }

    async fn docker(&self, args: &[&str]) -> Result<ProcessOutput, EngineError> {
        self.services
            .runner
            .run(
                ProcessCommand::new(&self.services.settings.tools.docker)
                    .args(args.iter().copied())
                    .timeout(DOCKER_TIMEOUT),
            )
            .await
    }

    /// `docker rm -f`, reported as a compensation result
    async fn remove_container(&self, ctx: &DeployContext<'_>, name: &str) -> Compensation {
        ctx.log.warning(format!("Removing container {}", name));
        let what = format!("container {} removed", name);
        match self.docker(&["rm", "-f", name]).await {
            Ok(output) if output.success() => {
                ctx.log.info(format!("Cleanup succeeded: {}", what));
                Compensation::Succeeded { what }
            }
            Ok(output) => {
                ctx.log.diagnostic("docker rm stderr", &output.stderr);
                let reason = EngineError::execution("docker rm", output.exit_code).to_string();
                ctx.log.warning(format!(
                    "WARNING: could not remove container {}: {}",
                    name, reason
                ));
                Compensation::Failed {
                    what: format!("remove container {}", name),
                    reason,
                }
            }
            Err(e) => {
                ctx.log.warning(format!("WARNING: could not remove container {}: {}", name, e));
                Compensation::Failed {
                    what: format!("remove container {}", name),
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl ModeDeployer for LocalDeployer {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Local
    }

    async fn deploy(&self, ctx: &DeployContext<'_>) -> Result<Outcome, Failure> {
        let settings = &self.services.settings;
        let app = app_name_from_url(&ctx.request.repo_url);
        let suffix = short_id();
        let container_port = ctx
            .request
            .container_port
            .unwrap_or(settings.local.container_port);
        let host_port = settings.local.host_port;

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

        let image = format!("shipyard/{}:{}", app, suffix);
        ctx.log.info(format!("Building image {}", image));
        let builder = ImageBuilder::new(
            self.services.runner.clone(),
            &settings.tools.docker,
            &settings.tools.aws,
        );
        builder
            .build_image(source.path(), &image, dockerfile.as_deref(), ctx.log)
            .await?;

        let container = format!("shipyard-{}-{}", app, suffix);
        let ports = format!("{}:{}", host_port, container_port);
        ctx.log.info(format!("Starting container {} on port {}", container, host_port));
        let started = self
            .docker(&["run", "-d", "--name", &container, "-p", &ports, &image])
            .await?;
        if !started.success() {
            ctx.log.diagnostic("docker run stderr", &started.stderr);
            let error = EngineError::execution("docker run", started.exit_code);
            // a failed run can still leave a created container behind
            let compensation = self.remove_container(ctx, &container).await;
            return Err(Failure::compensated(error, compensation));
        }
        let container_id = started.stdout.trim().to_string();

        let state = self
            .docker(&["inspect", "-f", "{{.State.Running}} {{.State.ExitCode}}", &container])
            .await
            .ok()
            .filter(|o| o.success())
            .map(|o| o.stdout.trim().to_string())
            .unwrap_or_default();
        let mut fields = state.split_whitespace();
        if fields.next() != Some("true") {
            warn!("Container {} is not running ({})", container, state);
            if let Ok(logs) = self.docker(&["logs", "--tail", "50", &container]).await {
                ctx.log.diagnostic("container logs", &format!("{}{}", logs.stdout, logs.stderr));
            }
            let exit_code = fields.next().and_then(|c| c.parse().ok());
            let error = EngineError::execution(format!("container {}", container), exit_code);
            let compensation = self.remove_container(ctx, &container).await;
            return Err(Failure::compensated(error, compensation));
        }

        let url = format!("http://localhost:{}", host_port);
        ctx.log.info(format!("Container {} is running at {}", container, url));
        Ok(Outcome::Success {
            message: format!("Deployed {} locally at {}", app, url),
            outputs: ProvisioningOutputs::new()
                .with("container_id", container_id)
                .with("container_name", container)
                .with("image", image)
                .with("url", url),
        })
    }
}
