//! Deployment workflows
//!
//! The [`Orchestrator`] owns a run: it creates the workspace, dispatches to
//! the [`ModeDeployer`] registered for the request's mode and turns the
//! outcome into a [`DeploymentResult`](crate::models::DeploymentResult).

pub mod cloud_hosted;
pub mod cloud_local;
pub mod image;
pub mod local;
pub mod message_log;
pub mod orchestrator;
pub mod outcome;
pub mod registry;
pub mod repo;
pub mod workspace;

use std::sync::Arc;

pub use cloud_hosted::CloudHostedDeployer;
pub use cloud_local::CloudLocalDeployer;
pub use local::LocalDeployer;
pub use message_log::{DeploymentMessageLog, LogEntry, MessageLevel};
pub use orchestrator::Orchestrator;
pub use outcome::{Compensation, Failure, Outcome};
pub use registry::{DeployContext, DeployServices, DeployerRegistry, ModeDeployer};
pub use repo::{FsRepoAnalyzer, RepoAnalysis, RepoAnalyzer};

/// Registry with a deployer for every supported mode
pub fn default_registry(services: Arc<DeployServices>) -> DeployerRegistry {
    let mut registry = DeployerRegistry::new();
    registry
        .register(Arc::new(LocalDeployer::new(services.clone())))
        .register(Arc::new(CloudLocalDeployer::new(services.clone())))
        .register(Arc::new(CloudHostedDeployer::new(services)));
    registry
}
