//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Deployment lifecycle (start, stop, status, logs, save-deployed)
//! - Job callbacks (status advance, log append), authenticated by
//!   job-scoped tokens rather than user tokens
//! - Health checks
//!
//! Authorisation is declared as data: every endpoint names a
//! [`policy::RoutePolicy`] and a single dispatcher evaluates it, so the
//! routing layer carries no per-framework middleware chains.

mod auth;
mod callbacks;
mod deploy;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ControlError;
use crate::orchestrator::Orchestrator;
use crate::store::ModelStore;
use crate::token::TokenSigner;

pub use auth::Caller;
pub use callbacks::{JobLogRequest, UpdateStatusRequest};
pub use deploy::{SaveDeployedRequest, StartDeploymentRequest};

/// Route authorisation policies.
pub mod policy {
    use crate::types::Permission;

    /// Which credential family a route accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Credential {
        /// A user token issued by the identity service.
        User,
        /// A job token bound to one model.
        Job,
    }

    /// What a route requires of its caller.
    #[derive(Debug, Clone, Copy)]
    pub struct RoutePolicy {
        /// Accepted credential family.
        pub credential: Credential,
        /// Minimum permission on the target model (user routes only).
        pub min_permission: Permission,
    }

    /// Start a deployment.
    pub const START: RoutePolicy = RoutePolicy {
        credential: Credential::User,
        min_permission: Permission::Owner,
    };

    /// Stop a deployment.
    pub const STOP: RoutePolicy = RoutePolicy {
        credential: Credential::User,
        min_permission: Permission::Owner,
    };

    /// Query deploy status.
    pub const STATUS: RoutePolicy = RoutePolicy {
        credential: Credential::User,
        min_permission: Permission::Read,
    };

    /// Fetch job logs.
    pub const LOGS: RoutePolicy = RoutePolicy {
        credential: Credential::User,
        min_permission: Permission::Read,
    };

    /// Clone a deployed model.
    pub const SAVE: RoutePolicy = RoutePolicy {
        credential: Credential::User,
        min_permission: Permission::Read,
    };

    /// Look up the caller's own permission.
    pub const PERMISSIONS: RoutePolicy = RoutePolicy {
        credential: Credential::User,
        min_permission: Permission::None,
    };

    /// Job callback: advance deploy status.
    pub const UPDATE_STATUS: RoutePolicy = RoutePolicy {
        credential: Credential::Job,
        min_permission: Permission::None,
    };

    /// Job callback: append a log record.
    pub const JOB_LOG: RoutePolicy = RoutePolicy {
        credential: Credential::Job,
        min_permission: Permission::None,
    };
}

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Deployment orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Store for direct read queries.
    pub store: Arc<dyn ModelStore>,
    /// Verifier for user tokens.
    pub user_tokens: Arc<dyn TokenSigner>,
    /// Verifier for job tokens.
    pub job_tokens: Arc<dyn TokenSigner>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Deployment lifecycle
        .route("/{model_id}", post(deploy::start))
        .route("/{model_id}", delete(deploy::stop))
        .route("/{model_id}/status", get(deploy::get_status))
        .route("/{model_id}/logs", get(deploy::logs))
        .route("/{model_id}/save", post(deploy::save_deployed))
        .route("/{model_id}/permissions", get(deploy::get_permissions))
        // Job callbacks
        .route("/update-status", post(callbacks::update_status))
        .route("/log", post(callbacks::job_log))
        .with_state(state)
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// An error already shaped for the HTTP surface.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a control error to its HTTP status.
fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::NotFound { .. } => StatusCode::NOT_FOUND,
        ControlError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        ControlError::Token(_) => StatusCode::UNAUTHORIZED,
        ControlError::InvalidState(_)
        | ControlError::DuplicateName(_)
        | ControlError::DependencyInUse { .. } => StatusCode::CONFLICT,
        ControlError::CyclicDependency(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        ControlError::Scheduler(_) | ControlError::StartFailure { .. } => StatusCode::BAD_GATEWAY,
        ControlError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Shape a control error for the HTTP surface.
fn into_api_error(error: &ControlError) -> ApiError {
    (
        error_to_status(error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let harness = testing::harness();
        let app = router(harness.state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        assert_eq!(
            error_to_status(&ControlError::model_not_found("m1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_to_status(&ControlError::QuotaExceeded {
                requested: 1,
                allocated: 1,
                limit: 1
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            error_to_status(&ControlError::CyclicDependency("m1".to_owned())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_to_status(&ControlError::DuplicateName("m1".to_owned())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_to_status(&ControlError::scheduler("down")),
            StatusCode::BAD_GATEWAY
        );
    }
}
