//! Cluster readiness layer
//!
//! Turns a provisioned cluster into an authenticated API endpoint and
//! confirms the namespace and load balancer a workload depends on.

pub mod client;
pub mod credentials;
pub mod handle;
pub mod readiness;

pub use client::ClusterClient;
pub use credentials::{acquire_kind_credentials, acquire_managed_credentials};
pub use handle::ClusterHandle;
pub use readiness::{
    apply_workload_manifests, delete_workload_manifests, ensure_namespace,
    wait_for_api_server, wait_for_load_balancer_address, LoadBalancerAddress, NamespaceState,
};
