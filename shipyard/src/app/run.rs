//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::EngineError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::settings::Settings;

/// Serve deployment requests until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    settings: Settings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    info!("Initializing shipyard...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let app_state = match AppState::init(settings, options.layout.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start: {}", e);
            return Err(e);
        }
    };

    let server_shutdown = shutdown_tx.subscribe();
    if let Err(e) =
        init_socket_server(&options, app_state, &mut shutdown_manager, server_shutdown).await
    {
        error!("Failed to start the HTTP server: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    socket_server_handle: Option<JoinHandle<Result<(), EngineError>>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            socket_server_handle: None,
        }
    }

    fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), EngineError>>,
    ) -> Result<(), EngineError> {
        if self.socket_server_handle.is_some() {
            return Err(EngineError::Internal("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), EngineError> {
        info!("Shutting down shipyard...");

        // in-flight requests finish (and compensate) before the server task ends
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| EngineError::Internal(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
