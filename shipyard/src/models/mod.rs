//! Domain models

pub mod deployment;
pub mod outputs;

pub use deployment::{
    CloudCredentials, DeploymentMode, DeploymentRequest, DeploymentResult, DeploymentStatus,
};
pub use outputs::ProvisioningOutputs;
