//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout for the engine.
///
/// Nothing here is durable deployment state: workspaces and credential
/// files are created per run and removed when the run ends.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Parent of every per-run provisioning workspace
    pub fn workspaces_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("workspaces"))
    }

    /// Private directory holding short-lived kubeconfig files
    pub fn credentials_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("credentials"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the directories, restricting the credentials dir to the owner
    pub async fn setup(&self) -> Result<(), EngineError> {
        self.workspaces_dir().create().await?;
        self.logs_dir().create().await?;
        let credentials = self.credentials_dir();
        credentials.create().await?;
        credentials.set_permissions_700().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/shipyard");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shipyard");

        Self::new(base_dir)
    }
}

#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
