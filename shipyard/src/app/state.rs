//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::deploy::{default_registry, DeployServices, FsRepoAnalyzer, Orchestrator, RepoAnalyzer};
use crate::errors::EngineError;
use crate::process::{CommandRunner, TokioCommandRunner};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::templates::Renderer;

/// Main application state
pub struct AppState {
    pub settings: Arc<Settings>,
    pub layout: StorageLayout,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Build the state with the production runner and analyzer
    pub async fn init(settings: Settings, layout: StorageLayout) -> Result<Self, EngineError> {
        Self::with_collaborators(
            settings,
            layout,
            Arc::new(TokioCommandRunner::new()),
            Arc::new(FsRepoAnalyzer),
        )
        .await
    }

    /// Build the state around the given command runner and analyzer
    pub async fn with_collaborators(
        settings: Settings,
        layout: StorageLayout,
        runner: Arc<dyn CommandRunner>,
        analyzer: Arc<dyn RepoAnalyzer>,
    ) -> Result<Self, EngineError> {
        info!("Initializing application state...");
        layout.setup().await?;

        let settings = Arc::new(settings);
        let services = Arc::new(DeployServices {
            runner,
            renderer: Arc::new(Renderer::new()?),
            analyzer,
            settings: settings.clone(),
            layout: layout.clone(),
        });
        let registry = default_registry(services);
        info!("Registered deployment modes: {:?}", registry.modes());
        let orchestrator = Arc::new(Orchestrator::new(registry, layout.clone()));

        Ok(Self {
            settings,
            layout,
            orchestrator,
        })
    }
}
