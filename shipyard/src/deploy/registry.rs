//! Mode deployers and the registry the orchestrator dispatches through

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::deploy::message_log::DeploymentMessageLog;
use crate::deploy::outcome::{Failure, Outcome};
use crate::deploy::repo::RepoAnalyzer;
use crate::filesys::dir::Dir;
use crate::models::{DeploymentMode, DeploymentRequest};
use crate::process::CommandRunner;
use crate::storage::{Settings, StorageLayout};
use crate::templates::Renderer;

/// Everything a deployer may touch during one run
pub struct DeployContext<'a> {
    pub deployment_id: &'a str,
    pub request: &'a DeploymentRequest,
    /// Exclusively owned by this run
    pub workspace: &'a Dir,
    pub log: &'a DeploymentMessageLog,
}

/// Runs the workflow for one deployment mode
#[async_trait]
pub trait ModeDeployer: Send + Sync {
    /// The mode this deployer handles
    fn mode(&self) -> DeploymentMode;

    /// Run the workflow, compensating on failure before returning
    async fn deploy(&self, ctx: &DeployContext<'_>) -> Result<Outcome, Failure>;
}

/// Shared collaborators handed to every deployer
pub struct DeployServices {
    pub runner: Arc<dyn CommandRunner>,
    pub renderer: Arc<Renderer>,
    pub analyzer: Arc<dyn RepoAnalyzer>,
    pub settings: Arc<Settings>,
    pub layout: StorageLayout,
}

/// Explicit mode to deployer table
#[derive(Default, Clone)]
pub struct DeployerRegistry {
    deployers: HashMap<DeploymentMode, Arc<dyn ModeDeployer>>,
}

impl DeployerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployer, replacing any earlier one for the same mode
    pub fn register(&mut self, deployer: Arc<dyn ModeDeployer>) -> &mut Self {
        self.deployers.insert(deployer.mode(), deployer);
        self
    }

    pub fn get(&self, mode: DeploymentMode) -> Option<Arc<dyn ModeDeployer>> {
        self.deployers.get(&mode).cloned()
    }

    pub fn modes(&self) -> Vec<DeploymentMode> {
        let mut modes: Vec<DeploymentMode> = self.deployers.keys().copied().collect();
        modes.sort_by_key(|m| m.as_str());
        modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProvisioningOutputs;

    struct Fixed(DeploymentMode);

    #[async_trait]
    impl ModeDeployer for Fixed {
        fn mode(&self) -> DeploymentMode {
            self.0
        }

        async fn deploy(&self, _ctx: &DeployContext<'_>) -> Result<Outcome, Failure> {
            Ok(Outcome::Success {
                message: "ok".to_string(),
                outputs: ProvisioningOutputs::new(),
            })
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DeployerRegistry::new();
        registry
            .register(Arc::new(Fixed(DeploymentMode::Local)))
            .register(Arc::new(Fixed(DeploymentMode::CloudLocal)));

        assert!(registry.get(DeploymentMode::Local).is_some());
        assert!(registry.get(DeploymentMode::CloudHosted).is_none());
        assert_eq!(
            registry.modes(),
            vec![DeploymentMode::CloudLocal, DeploymentMode::Local]
        );
    }
}
