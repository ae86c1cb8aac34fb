//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::EngineError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Create a fresh child named `<prefix>-<uuid>`; fails if it already exists
    pub async fn create_unique_child(&self, prefix: &str) -> Result<Dir, EngineError> {
        self.create().await?;
        let child = self
            .path
            .join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir(&child).await?;
        Ok(Dir::new(child))
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), EngineError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Restrict the directory to its owner (0o700) on Unix.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn set_permissions_700(&self) -> Result<(), EngineError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path).await?.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
