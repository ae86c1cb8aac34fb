//! Infrastructure-as-code driver
//!
//! Renders the cloud-local Terraform config into a workspace and runs the
//! `init` / `apply` / `destroy` protocol against it. Every invocation is
//! non-interactive and receives credentials through its environment.

pub mod context;
pub mod outputs;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::ProvisioningOutputs;
use crate::process::{CommandRunner, ProcessCommand, ProcessOutput};
use crate::templates::{Renderer, TemplateId};

pub use context::{ProvisioningContext, TerraformVars};
pub use outputs::parse_outputs;

/// Name of the generated config inside the workspace
pub const CONFIG_FILE: &str = "main.tf";

/// Name of the bootstrap payload the config embeds
pub const BOOTSTRAP_FILE: &str = "bootstrap.sh";

/// Outcome of one Terraform phase that ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolResult {
    fn from_output(output: ProcessOutput) -> Self {
        Self {
            ok: output.success(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    /// Error describing this failed phase; stderr is left out
    pub fn to_error(&self, phase: &str) -> EngineError {
        EngineError::execution(format!("terraform {}", phase), self.exit_code)
    }
}

/// Outcome of `apply` plus the output query that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub ok: bool,
    pub exit_code: Option<i32>,
    /// Empty when apply failed or the output query did not succeed
    pub outputs: ProvisioningOutputs,
    /// Apply succeeded but its outputs could not be read
    pub outputs_unavailable: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ApplyResult {
    pub fn to_error(&self) -> EngineError {
        EngineError::execution("terraform apply", self.exit_code)
    }
}

/// Terraform driver bound to one binary and one renderer
pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    renderer: Arc<Renderer>,
    terraform: String,
}

impl Provisioner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        renderer: Arc<Renderer>,
        terraform: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            renderer,
            terraform: terraform.into(),
        }
    }

    /// Validate `context` and write the config plus bootstrap payload.
    ///
    /// Validation happens before anything touches the workspace, so a
    /// missing field leaves it untouched.
    pub async fn generate_config(
        &self,
        workspace: &Dir,
        context: &ProvisioningContext,
    ) -> Result<PathBuf, EngineError> {
        let vars = context.validate()?;
        let config = self.renderer.render(TemplateId::CloudLocalTerraform, &vars)?;

        workspace
            .file(BOOTSTRAP_FILE)
            .write_string(&context.bootstrap_script)
            .await?;
        let config_file = workspace.file(CONFIG_FILE);
        config_file.write_string(&config).await?;

        debug!(
            "Wrote {} for {} in {}",
            CONFIG_FILE,
            vars.resource_name,
            workspace.path().display()
        );
        Ok(config_file.path().to_path_buf())
    }

    /// `terraform init`
    pub async fn init(
        &self,
        workspace: &Dir,
        env: &HashMap<String, String>,
    ) -> Result<ToolResult, EngineError> {
        info!("Initializing Terraform in {}", workspace.path().display());
        self.phase(workspace, env, &["init", "-input=false", "-no-color"])
            .await
    }

    /// `terraform apply`, then `terraform output -json` if apply succeeded
    pub async fn apply(
        &self,
        workspace: &Dir,
        env: &HashMap<String, String>,
    ) -> Result<ApplyResult, EngineError> {
        info!("Applying Terraform config in {}", workspace.path().display());
        let applied = self
            .phase(
                workspace,
                env,
                &["apply", "-auto-approve", "-input=false", "-no-color"],
            )
            .await?;

        if !applied.ok {
            return Ok(ApplyResult {
                ok: false,
                exit_code: applied.exit_code,
                outputs: ProvisioningOutputs::new(),
                outputs_unavailable: false,
                stdout: applied.stdout,
                stderr: applied.stderr,
            });
        }

        // the infrastructure exists from here on; a failed query only loses introspection
        let (outputs, outputs_unavailable) = match self.query_outputs(workspace, env).await {
            Ok(outputs) => (outputs, false),
            Err(e) => {
                warn!("Apply succeeded but reading outputs failed: {}", e);
                (ProvisioningOutputs::new(), true)
            }
        };

        Ok(ApplyResult {
            ok: true,
            exit_code: applied.exit_code,
            outputs,
            outputs_unavailable,
            stdout: applied.stdout,
            stderr: applied.stderr,
        })
    }

    /// `terraform destroy`
    pub async fn destroy(
        &self,
        workspace: &Dir,
        env: &HashMap<String, String>,
    ) -> Result<ToolResult, EngineError> {
        info!("Destroying Terraform resources in {}", workspace.path().display());
        self.phase(
            workspace,
            env,
            &["destroy", "-auto-approve", "-input=false", "-no-color"],
        )
        .await
    }

    async fn query_outputs(
        &self,
        workspace: &Dir,
        env: &HashMap<String, String>,
    ) -> Result<ProvisioningOutputs, EngineError> {
        let result = self.phase(workspace, env, &["output", "-json"]).await?;
        if !result.ok {
            return Err(result.to_error("output"));
        }
        parse_outputs(&result.stdout)
    }

    async fn phase(
        &self,
        workspace: &Dir,
        env: &HashMap<String, String>,
        args: &[&str],
    ) -> Result<ToolResult, EngineError> {
        let command = ProcessCommand::new(&self.terraform)
            .args(args.iter().copied())
            .envs(env)
            .envs(&automation_env())
            .current_dir(workspace.path());

        let output = self.runner.run(command).await?;
        let result = ToolResult::from_output(output);
        if !result.ok {
            warn!(
                "terraform {} exited with {:?}",
                args.first().copied().unwrap_or_default(),
                result.exit_code
            );
        }
        Ok(result)
    }
}

fn automation_env() -> HashMap<String, String> {
    HashMap::from([
        ("TF_IN_AUTOMATION".to_string(), "1".to_string()),
        ("TF_INPUT".to_string(), "0".to_string()),
    ])
}
