//! Policy evaluation for inbound requests.
//!
//! Each route declares a [`RoutePolicy`](super::policy::RoutePolicy); this
//! module is the one dispatcher that evaluates it. User routes verify the
//! bearer against the user-token signer and resolve the caller's model
//! permission through the access gate; job routes verify against the
//! job-token signer and yield the model the token is bound to. The
//! orchestrator re-verifies user permissions inside its transactions, so a
//! pass here is a gate, not the final word.

use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;

use crate::access;
use crate::error::ControlError;
use crate::store::QueryOptions;
use crate::types::{ModelId, Permission, UserId};

use super::policy::{Credential, RoutePolicy};
use super::{into_api_error, ApiError, AppState, ErrorResponse};

/// The authenticated principal a policy evaluation produced.
#[derive(Debug, Clone)]
pub enum Caller {
    /// A user, identified by the token's `user_id` claim.
    User(UserId),
    /// A job, bound to the model in the token's `model_id` claim.
    Job(ModelId),
}

fn unauthorized(message: impl Into<String>) -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized("missing or malformed Authorization header"))
}

/// Evaluate a route policy against the request's bearer token.
///
/// For user routes with a target model, the caller's permission is resolved
/// and compared to the policy's minimum. Job routes only establish which
/// model the token is bound to; the orchestrator enforces the binding
/// against the callback's target.
pub async fn authorize(
    state: &AppState,
    policy: &RoutePolicy,
    headers: &HeaderMap,
    model_id: Option<&ModelId>,
) -> Result<Caller, ApiError> {
    let token = bearer_token(headers)?;

    match policy.credential {
        Credential::User => {
            let user_id = state
                .user_tokens
                .verify(token, crate::token::USER_CLAIM)
                .map(UserId::new)
                .map_err(|e| unauthorized(e.to_string()))?;

            if let Some(model_id) = model_id {
                let model = state
                    .store
                    .get_model(model_id, &QueryOptions::bare())
                    .await
                    .map_err(|e| into_api_error(&e))?
                    .ok_or_else(|| into_api_error(&ControlError::model_not_found(model_id)))?;

                let level = access::permission_level(state.store.as_ref(), &user_id, &model)
                    .await
                    .map_err(|e| into_api_error(&e))?;

                if level < policy.min_permission {
                    return Err(into_api_error(&ControlError::PermissionDenied {
                        user: user_id.to_string(),
                        model: model_id.to_string(),
                        required: policy.min_permission.as_str(),
                    }));
                }
            }

            Ok(Caller::User(user_id))
        }
        Credential::Job => {
            let bound = state
                .job_tokens
                .verify(token, crate::token::MODEL_CLAIM)
                .map(ModelId::new)
                .map_err(|e| unauthorized(e.to_string()))?;
            Ok(Caller::Job(bound))
        }
    }
}

/// Evaluate a user-credential policy, yielding the caller's user id.
pub async fn authorize_user(
    state: &AppState,
    policy: &RoutePolicy,
    headers: &HeaderMap,
    model_id: &ModelId,
) -> Result<UserId, ApiError> {
    match authorize(state, policy, headers, Some(model_id)).await? {
        Caller::User(user_id) => Ok(user_id),
        Caller::Job(_) => Err(unauthorized("user token required")),
    }
}

/// Evaluate a job-credential policy, yielding the token's bound model.
pub async fn authorize_job(
    state: &AppState,
    policy: &RoutePolicy,
    headers: &HeaderMap,
) -> Result<ModelId, ApiError> {
    match authorize(state, policy, headers, None).await? {
        Caller::Job(model_id) => Ok(model_id),
        Caller::User(_) => Err(unauthorized("job token required")),
    }
}

/// Resolve a permission without enforcing a minimum, for the permissions
/// lookup endpoint.
pub async fn resolve_permission(
    state: &AppState,
    user_id: &UserId,
    model_id: &ModelId,
) -> Result<Permission, ApiError> {
    state
        .orchestrator
        .permission_for(user_id, model_id)
        .await
        .map_err(|e| into_api_error(&e))
}
