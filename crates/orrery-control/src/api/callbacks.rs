//! Job callback endpoints.
//!
//! Running jobs report back over a separate authentication path: a
//! job-scoped token minted at deploy time, bound to exactly one model. The
//! orchestrator rejects callbacks whose token binding differs from the
//! model they name.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{ModelId, Status};

use super::auth::authorize_job;
use super::{into_api_error, ApiError, AppState, policy};

/// Status advance reported by a job.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// Model the job reports for. Must match the token's binding.
    pub model_id: String,
    /// New deploy status.
    pub status: Status,
}

/// Log record reported by a job.
#[derive(Debug, Deserialize)]
pub struct JobLogRequest {
    /// Model the job reports for. Must match the token's binding.
    pub model_id: String,
    /// Log level.
    #[serde(default = "default_level")]
    pub level: String,
    /// Log message.
    pub message: String,
}

fn default_level() -> String {
    "info".to_owned()
}

/// Response for an accepted callback.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    /// Whether the callback was applied.
    pub applied: bool,
}

/// Advance the deploy status of the token's bound model.
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<(StatusCode, Json<CallbackResponse>), ApiError> {
    let bound = authorize_job(&state, &policy::UPDATE_STATUS, &headers).await?;
    let model_id = ModelId::new(request.model_id);

    info!(
        model_id = %model_id,
        status = %request.status,
        "status callback received"
    );

    state
        .orchestrator
        .advance_status(&bound, &model_id, request.status)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok((StatusCode::OK, Json(CallbackResponse { applied: true })))
}

/// Append a log record for the token's bound model.
pub async fn job_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<JobLogRequest>,
) -> Result<(StatusCode, Json<CallbackResponse>), ApiError> {
    let bound = authorize_job(&state, &policy::JOB_LOG, &headers).await?;
    let model_id = ModelId::new(request.model_id);

    state
        .orchestrator
        .append_log(&bound, &model_id, &request.level, &request.message)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok((StatusCode::OK, Json(CallbackResponse { applied: true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::api::testing::{harness, JOB_SECRET, USER_SECRET};
    use crate::store::ModelStore;
    use crate::token::{HsTokenSigner, TokenSigner, MODEL_CLAIM, USER_CLAIM};
    use crate::types::{AccessLevel, ModelRecord, Status, UserId};
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    fn job_token(model: &str) -> String {
        HsTokenSigner::new(JOB_SECRET)
            .issue(MODEL_CLAIM, model, chrono::Duration::hours(1))
            .expect("issue failed")
    }

    async fn seed_active(harness: &crate::api::testing::TestHarness, id: &str) {
        let now = chrono::Utc::now();
        harness
            .store
            .insert_model(&ModelRecord {
                id: ModelId::new(id),
                name: id.to_owned(),
                model_type: "ndb".to_owned(),
                user_id: UserId::new("u1"),
                parent_id: None,
                access: AccessLevel::Private,
                train_status: Status::Complete,
                deploy_status: Status::Starting,
                attributes: BTreeMap::new(),
                dependencies: Vec::new(),
                owner: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("insert failed");
    }

    #[tokio::test]
    async fn update_status_applies_for_bound_model() {
        let h = harness();
        seed_active(&h, "m1").await;
        let app = router(h.state.clone());

        let body = serde_json::json!({"model_id": "m1", "status": "in_progress"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/update-status")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", job_token("m1")))
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let model = h
            .state
            .orchestrator
            .status(&ModelId::new("m1"))
            .await
            .expect("status failed");
        assert_eq!(model, Status::InProgress);
    }

    #[tokio::test]
    async fn update_status_rejected_for_other_model() {
        let h = harness();
        seed_active(&h, "m1").await;
        seed_active(&h, "m2").await;
        let app = router(h.state.clone());

        let body = serde_json::json!({"model_id": "m2", "status": "in_progress"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/update-status")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", job_token("m1")))
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let status = h
            .state
            .orchestrator
            .status(&ModelId::new("m2"))
            .await
            .expect("status failed");
        assert_eq!(status, Status::Starting);
    }

    #[tokio::test]
    async fn user_token_cannot_reach_callback_route() {
        let h = harness();
        seed_active(&h, "m1").await;
        let app = router(h.state);

        let body = serde_json::json!({"model_id": "m1", "status": "in_progress"});
        let user_token = HsTokenSigner::new(USER_SECRET)
            .issue(USER_CLAIM, "u1", chrono::Duration::hours(1))
            .expect("issue failed");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/update-status")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {user_token}"))
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn job_log_appends_record() {
        let h = harness();
        seed_active(&h, "m1").await;
        let app = router(h.state.clone());

        let body = serde_json::json!({"model_id": "m1", "level": "warn", "message": "low memory"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/log")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", job_token("m1")))
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let logs = h
            .state
            .orchestrator
            .job_logs(&ModelId::new("m1"), 10)
            .await
            .expect("logs failed");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "warn");
        assert_eq!(logs[0].message, "low memory");
    }
}
