//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings, read from `settings.json`.
///
/// Every field has a default so a partial file (or none at all) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rotated log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// External tool binaries
    #[serde(default)]
    pub tools: ToolSettings,

    /// Local container runtime mode
    #[serde(default)]
    pub local: LocalSettings,

    /// Single-VM Kubernetes mode
    #[serde(default)]
    pub cloud_local: CloudLocalSettings,

    /// Managed Kubernetes mode
    #[serde(default)]
    pub cloud_hosted: CloudHostedSettings,

    /// Wait budgets and intervals
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        if !file.exists().await {
            info!(
                "No settings file at {}, using defaults",
                file.path().display()
            );
            return Ok(Settings::default());
        }
        file.read_json::<Settings>().await
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Names (or paths) of the external binaries the engine drives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_terraform")]
    pub terraform: String,

    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_docker")]
    pub docker: String,

    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default = "default_ssh")]
    pub ssh: String,

    #[serde(default = "default_sftp")]
    pub sftp: String,

    #[serde(default = "default_aws")]
    pub aws: String,
}

fn default_terraform() -> String {
    "terraform".to_string()
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_ssh() -> String {
    "ssh".to_string()
}

fn default_sftp() -> String {
    "sftp".to_string()
}

fn default_aws() -> String {
    "aws".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            terraform: default_terraform(),
            kubectl: default_kubectl(),
            docker: default_docker(),
            git: default_git(),
            ssh: default_ssh(),
            sftp: default_sftp(),
            aws: default_aws(),
        }
    }
}

/// Local container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Host port the container is published on
    #[serde(default = "default_app_port")]
    pub host_port: u16,

    /// Port the application listens on inside the container
    #[serde(default = "default_app_port")]
    pub container_port: u16,
}

fn default_app_port() -> u16 {
    8080
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            host_port: default_app_port(),
            container_port: default_app_port(),
        }
    }
}

/// Single-VM Kubernetes (kind on EC2) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudLocalSettings {
    #[serde(default = "default_region")]
    pub region: String,

    /// Machine image for the VM (Ubuntu 22.04 in us-east-1 by default)
    #[serde(default = "default_ami")]
    pub ami: String,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    /// EC2 key pair name used when the request does not carry one
    #[serde(default)]
    pub key_name: Option<String>,

    /// Private key matching the key pair; enables cluster bring-up over SSH
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// NodePort the workload is exposed on
    #[serde(default = "default_node_port")]
    pub node_port: u16,

    #[serde(default = "default_kind_cluster")]
    pub kind_cluster_name: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_ami() -> String {
    "ami-0c7217cdde317cfec".to_string()
}

fn default_instance_type() -> String {
    "t3.medium".to_string()
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_node_port() -> u16 {
    30080
}

fn default_kind_cluster() -> String {
    "shipyard".to_string()
}

impl Default for CloudLocalSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            ami: default_ami(),
            instance_type: default_instance_type(),
            key_name: None,
            private_key_path: None,
            ssh_user: default_ssh_user(),
            node_port: default_node_port(),
            kind_cluster_name: default_kind_cluster(),
        }
    }
}

/// Managed Kubernetes (EKS) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudHostedSettings {
    /// Existing managed cluster to deploy onto
    #[serde(default)]
    pub cluster_name: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Image registry, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com/apps`
    #[serde(default)]
    pub registry: Option<String>,
}

impl Default for CloudHostedSettings {
    fn default() -> Self {
        Self {
            cluster_name: None,
            region: default_region(),
            registry: None,
        }
    }
}

/// Wait budgets and intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_api_server_secs")]
    pub api_server_secs: u64,

    #[serde(default = "default_api_initial_interval_secs")]
    pub api_initial_interval_secs: u64,

    #[serde(default = "default_api_max_interval_secs")]
    pub api_max_interval_secs: u64,

    #[serde(default = "default_load_balancer_secs")]
    pub load_balancer_secs: u64,

    #[serde(default = "default_load_balancer_interval_secs")]
    pub load_balancer_interval_secs: u64,

    #[serde(default = "default_ssh_ready_secs")]
    pub ssh_ready_secs: u64,

    #[serde(default = "default_ssh_connect_secs")]
    pub ssh_connect_secs: u64,

    #[serde(default = "default_bootstrap_secs")]
    pub bootstrap_secs: u64,

    #[serde(default = "default_bootstrap_interval_secs")]
    pub bootstrap_interval_secs: u64,

    /// Limit for a single remote command (e.g. the image build on the VM)
    #[serde(default = "default_remote_command_secs")]
    pub remote_command_secs: u64,
}

fn default_api_server_secs() -> u64 {
    300
}

fn default_api_initial_interval_secs() -> u64 {
    2
}

fn default_api_max_interval_secs() -> u64 {
    30
}

fn default_load_balancer_secs() -> u64 {
    600
}

fn default_load_balancer_interval_secs() -> u64 {
    15
}

fn default_ssh_ready_secs() -> u64 {
    300
}

fn default_ssh_connect_secs() -> u64 {
    10
}

fn default_bootstrap_secs() -> u64 {
    900
}

fn default_bootstrap_interval_secs() -> u64 {
    15
}

fn default_remote_command_secs() -> u64 {
    900
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            api_server_secs: default_api_server_secs(),
            api_initial_interval_secs: default_api_initial_interval_secs(),
            api_max_interval_secs: default_api_max_interval_secs(),
            load_balancer_secs: default_load_balancer_secs(),
            load_balancer_interval_secs: default_load_balancer_interval_secs(),
            ssh_ready_secs: default_ssh_ready_secs(),
            ssh_connect_secs: default_ssh_connect_secs(),
            bootstrap_secs: default_bootstrap_secs(),
            bootstrap_interval_secs: default_bootstrap_interval_secs(),
            remote_command_secs: default_remote_command_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn api_server(&self) -> Duration {
        Duration::from_secs(self.api_server_secs)
    }

    pub fn api_initial_interval(&self) -> Duration {
        Duration::from_secs(self.api_initial_interval_secs)
    }

    pub fn api_max_interval(&self) -> Duration {
        Duration::from_secs(self.api_max_interval_secs)
    }

    pub fn load_balancer(&self) -> Duration {
        Duration::from_secs(self.load_balancer_secs)
    }

    pub fn load_balancer_interval(&self) -> Duration {
        Duration::from_secs(self.load_balancer_interval_secs)
    }

    pub fn ssh_ready(&self) -> Duration {
        Duration::from_secs(self.ssh_ready_secs)
    }

    pub fn ssh_connect(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_secs)
    }

    pub fn bootstrap(&self) -> Duration {
        Duration::from_secs(self.bootstrap_secs)
    }

    pub fn bootstrap_interval(&self) -> Duration {
        Duration::from_secs(self.bootstrap_interval_secs)
    }

    pub fn remote_command(&self) -> Duration {
        Duration::from_secs(self.remote_command_secs)
    }
}
