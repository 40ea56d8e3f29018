//! Deployment lifecycle endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::orchestrator::StartRequest;
use crate::types::ModelId;

use super::auth::{authorize_user, resolve_permission};
use super::{into_api_error, ApiError, AppState, policy};

/// Request to start a deployment.
#[derive(Debug, Deserialize)]
pub struct StartDeploymentRequest {
    /// Descriptive name for the deployment.
    #[serde(default)]
    pub deployment_name: String,
    /// Whether the scheduler may scale replicas.
    #[serde(default)]
    pub autoscaling_enabled: bool,
    /// Replica ceiling when autoscaling.
    #[serde(default)]
    pub autoscaling_max: u32,
    /// Requested baseline memory in MB.
    #[serde(default)]
    pub memory: u64,
}

/// Request to clone a deployed model.
#[derive(Debug, Deserialize)]
pub struct SaveDeployedRequest {
    /// Name for the new model.
    pub model_name: String,
}

/// Response confirming an accepted operation.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Always true; errors use [`super::ErrorResponse`].
    pub success: bool,
}

/// Response for a status query.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Model queried.
    pub model_id: String,
    /// Current deploy status.
    pub deploy_status: String,
}

/// Response for a clone.
#[derive(Debug, Serialize)]
pub struct SaveDeployedResponse {
    /// Identifier of the new model.
    pub model_id: String,
    /// Short-lived token to finish the update handshake.
    pub update_token: String,
}

/// Response for a permissions lookup.
#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    /// Model queried.
    pub model_id: String,
    /// The caller's resolved permission.
    pub permission: String,
}

/// Start a model's deployment (dependencies included).
pub async fn start(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StartDeploymentRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let model_id = ModelId::new(model_id);
    let user_id = authorize_user(&state, &policy::START, &headers, &model_id).await?;

    info!(model_id = %model_id, user_id = %user_id, "start requested via API");

    let start_request = StartRequest {
        deployment_name: request.deployment_name,
        autoscaling_enabled: request.autoscaling_enabled,
        autoscaling_max: request.autoscaling_max,
        memory_mb: request.memory,
    };

    state
        .orchestrator
        .start(&model_id, &user_id, &start_request)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Stop a model's deployment.
pub async fn stop(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let model_id = ModelId::new(model_id);
    let user_id = authorize_user(&state, &policy::STOP, &headers, &model_id).await?;

    info!(model_id = %model_id, user_id = %user_id, "stop requested via API");

    state
        .orchestrator
        .stop(&model_id, &user_id)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Current deploy status.
pub async fn get_status(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    let model_id = ModelId::new(model_id);
    authorize_user(&state, &policy::STATUS, &headers, &model_id).await?;

    let status = state
        .orchestrator
        .status(&model_id)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(StatusResponse {
        model_id: model_id.to_string(),
        deploy_status: status.as_str().to_owned(),
    }))
}

/// Proxy the scheduler's logs for the model's job.
pub async fn logs(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    let model_id = ModelId::new(model_id);
    authorize_user(&state, &policy::LOGS, &headers, &model_id).await?;

    state
        .orchestrator
        .logs(&model_id)
        .await
        .map_err(|e| into_api_error(&e))
}

/// Clone a deployed model under a new name.
pub async fn save_deployed(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SaveDeployedRequest>,
) -> Result<Json<SaveDeployedResponse>, ApiError> {
    let model_id = ModelId::new(model_id);
    let user_id = authorize_user(&state, &policy::SAVE, &headers, &model_id).await?;

    let saved = state
        .orchestrator
        .save_deployed(&model_id, &user_id, &request.model_name)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(SaveDeployedResponse {
        model_id: saved.model_id.to_string(),
        update_token: saved.update_token,
    }))
}

/// The caller's resolved permission on a model.
pub async fn get_permissions(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let model_id = ModelId::new(model_id);
    let user_id = authorize_user(&state, &policy::PERMISSIONS, &headers, &model_id).await?;

    let permission = resolve_permission(&state, &user_id, &model_id).await?;

    Ok(Json(PermissionsResponse {
        model_id: model_id.to_string(),
        permission: permission.as_str().to_owned(),
    }))
}
