//! Container image build, registry login and push

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::message_log::DeploymentMessageLog;
use crate::errors::EngineError;
use crate::process::{CommandRunner, ProcessCommand};

const BUILD_TIMEOUT: Duration = Duration::from_secs(1800);
const PUSH_TIMEOUT: Duration = Duration::from_secs(900);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives the docker CLI (and the cloud CLI for registry tokens)
pub struct ImageBuilder {
    runner: Arc<dyn CommandRunner>,
    docker: String,
    aws: String,
}

impl ImageBuilder {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        docker: impl Into<String>,
        aws: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            docker: docker.into(),
            aws: aws.into(),
        }
    }

    /// `docker build -t <image> [-f <dockerfile>] <context>`
    pub async fn build_image(
        &self,
        context_dir: &Path,
        image: &str,
        dockerfile: Option<&Path>,
        log: &DeploymentMessageLog,
    ) -> Result<String, EngineError> {
        let mut command = ProcessCommand::new(&self.docker).args(["build", "-t", image]);
        if let Some(dockerfile) = dockerfile {
            command = command.arg("-f").arg(dockerfile.display().to_string());
        }
        let command = command
            .arg(context_dir.display().to_string())
            .timeout(BUILD_TIMEOUT);

        let output = self.runner.run(command).await?;
        if !output.success() {
            log.diagnostic("docker build stderr", &output.stderr);
            return Err(EngineError::execution("docker build", output.exit_code));
        }
        info!("Built image {}", image);
        Ok(image.to_string())
    }

    /// Log in to an ECR registry with a short-lived token.
    ///
    /// The token travels from one process's stdout to the other's stdin and
    /// never appears in arguments.
    pub async fn registry_login(
        &self,
        registry: &str,
        region: &str,
        env: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        let token = self
            .runner
            .run(
                ProcessCommand::new(&self.aws)
                    .args(["ecr", "get-login-password", "--region", region])
                    .envs(env)
                    .timeout(LOGIN_TIMEOUT),
            )
            .await?;
        if !token.success() {
            warn!("ecr get-login-password: {}", token.stderr.trim());
            return Err(EngineError::execution("aws ecr get-login-password", token.exit_code));
        }

        let host = registry_host(registry);
        let login = self
            .runner
            .run(
                ProcessCommand::new(&self.docker)
                    .args(["login", "--username", "AWS", "--password-stdin", host])
                    .stdin(token.stdout.trim().to_string())
                    .timeout(LOGIN_TIMEOUT),
            )
            .await?;
        if !login.success() {
            return Err(EngineError::AuthenticationFailed {
                host: host.to_string(),
            });
        }
        info!("Logged in to {}", host);
        Ok(())
    }

    /// `docker push`, returning the pushed reference
    pub async fn push_image(
        &self,
        image: &str,
        log: &DeploymentMessageLog,
    ) -> Result<String, EngineError> {
        let output = self
            .runner
            .run(
                ProcessCommand::new(&self.docker)
                    .args(["push", image])
                    .timeout(PUSH_TIMEOUT),
            )
            .await?;
        if !output.success() {
            log.diagnostic("docker push stderr", &output.stderr);
            return Err(EngineError::execution("docker push", output.exit_code));
        }
        info!("Pushed {}", image);
        Ok(image.to_string())
    }
}

/// Registry host of a repository URI (`host/path` -> `host`)
pub fn registry_host(registry: &str) -> &str {
    registry.split('/').next().unwrap_or(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::{ScriptedResponse, ScriptedRunner};

    #[tokio::test]
    async fn test_login_pipes_token_through_stdin() {
        let runner = ScriptedRunner::new();
        runner.on("aws", &["get-login-password"], ScriptedResponse::ok("tok3n\n"));
        let builder = ImageBuilder::new(Arc::new(runner.clone()), "docker", "aws");

        builder
            .registry_login(
                "123456789012.dkr.ecr.us-east-1.amazonaws.com/apps",
                "us-east-1",
                &HashMap::new(),
            )
            .await
            .unwrap();

        let login = runner
            .calls()
            .into_iter()
            .find(|c| c.program == "docker")
            .unwrap();
        assert!(login.has_args(&[
            "--password-stdin",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com"
        ]));
        assert_eq!(login.stdin.as_deref(), Some("tok3n"));
        assert!(!login.args.iter().any(|a| a.contains("tok3n")));
    }

    #[tokio::test]
    async fn test_build_failure_keeps_stderr_out_of_error() {
        let runner = ScriptedRunner::new();
        runner.on("docker", &["build"], ScriptedResponse::exit(1, "", "COPY failed: secret path"));
        let builder = ImageBuilder::new(Arc::new(runner), "docker", "aws");
        let log = DeploymentMessageLog::new("d");

        let err = builder
            .build_image(Path::new("/tmp/src"), "web:1", None, &log)
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("secret path"));
        assert!(log.transcript().is_empty());
        assert_eq!(log.entries().len(), 1);
    }
}
