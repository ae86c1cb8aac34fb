//! Scoped kubeconfig files

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::utils::dns_label;

/// A kubeconfig for one cluster, written owner-only into the credentials dir.
///
/// Callers release the handle when the workflow ends. Dropping an
/// unreleased handle still removes the file, synchronously and without
/// reporting errors.
#[derive(Debug)]
pub struct ClusterHandle {
    cluster_name: String,
    path: PathBuf,
    released: bool,
}

impl ClusterHandle {
    /// Write `kubeconfig` to a fresh private file under `dir`
    pub async fn create(
        dir: &Dir,
        cluster_name: &str,
        kubeconfig: &str,
    ) -> Result<Self, EngineError> {
        dir.create().await?;
        dir.set_permissions_700().await?;

        let name = format!("kubeconfig-{}-{}", dns_label(cluster_name), uuid::Uuid::new_v4());
        let file = dir.file(&name);
        file.write_private(kubeconfig).await?;
        debug!("Wrote kubeconfig for {} to {}", cluster_name, file.path().display());

        Ok(Self {
            cluster_name: cluster_name.to_string(),
            path: file.path().to_path_buf(),
            released: false,
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Path handed to `kubectl --kubeconfig`
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the kubeconfig file
    pub async fn release(mut self) -> Result<(), EngineError> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Released kubeconfig for {}", self.cluster_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ClusterHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove kubeconfig {}: {}", self.path.display(), e);
            }
        }
    }
}
