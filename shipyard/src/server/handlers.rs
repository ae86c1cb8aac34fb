//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{ErrorResponse, HealthResponse, ModesResponse, VersionResponse};
use tracing::{error, info, warn};

use crate::errors::EngineError;
use crate::models::{DeploymentRequest, DeploymentResult, DeploymentStatus};
use crate::server::state::ServerState;
use crate::utils::{generate_uuid, version_info};

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Modes with a registered deployer
pub async fn modes_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let modes = state
        .orchestrator
        .registry()
        .modes()
        .into_iter()
        .map(|m| m.as_str().to_string())
        .collect();
    Json(ModesResponse { modes })
}

/// Run one deployment to completion.
///
/// The run is spawned onto its own task and finishes even if the client
/// goes away. Success and pending-feature results answer 200, error results
/// 422. A body that does not parse never reaches the orchestrator.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<DeploymentRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected deployment request: {}", rejection.body_text());
            return (
                rejection.status(),
                Json(
                    ErrorResponse::new("invalid deployment request")
                        .with_details(rejection.body_text()),
                ),
            )
                .into_response();
        }
    };

    info!(mode = %request.deployment_mode, "Deployment requested for {}", request.repo_url);
    let mode = request.deployment_mode;
    let orchestrator = state.orchestrator.clone();
    // a dropped connection must not cancel a provisioning run midway
    let result = match tokio::spawn(async move { orchestrator.deploy(request).await }).await {
        Ok(result) => result,
        Err(e) => {
            error!("Deployment task failed: {}", e);
            let message =
                EngineError::Internal(format!("deployment task failed: {}", e)).to_string();
            DeploymentResult::error(generate_uuid(), mode, message, Vec::new())
        }
    };

    let status = match result.status() {
        DeploymentStatus::Error => StatusCode::UNPROCESSABLE_ENTITY,
        DeploymentStatus::Success | DeploymentStatus::PendingFeature => StatusCode::OK,
    };
    (status, Json(result)).into_response()
}
