//! Shipyard Library
//!
//! Deployment orchestration engine: provisions infrastructure, brings up
//! Kubernetes clusters and ships repositories onto them.

pub mod app;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod poll;
pub mod process;
pub mod provisioner;
pub mod remote;
pub mod server;
pub mod storage;
pub mod templates;
pub mod utils;
