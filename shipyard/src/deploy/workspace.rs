//! Ephemeral per-run provisioning workspace

use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;

/// A uniquely named directory owned by exactly one deployment run.
///
/// [`ProvisioningWorkspace::release`] removes it; an unreleased workspace
/// is removed on drop.
#[derive(Debug)]
pub struct ProvisioningWorkspace {
    dir: Dir,
    released: bool,
}

impl ProvisioningWorkspace {
    /// Create `<parent>/<deployment_id>-<uuid>`
    pub async fn create(parent: &Dir, deployment_id: &str) -> Result<Self, EngineError> {
        let dir = parent.create_unique_child(deployment_id).await?;
        debug!("Created workspace {}", dir.path().display());
        Ok(Self {
            dir,
            released: false,
        })
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    /// Remove the directory and everything in it
    pub async fn release(mut self) -> Result<(), EngineError> {
        self.released = true;
        self.dir.delete().await?;
        debug!("Removed workspace {}", self.dir.path().display());
        Ok(())
    }
}

impl Drop for ProvisioningWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(self.dir.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {}: {}", self.dir.path().display(), e);
            }
        }
    }
}
