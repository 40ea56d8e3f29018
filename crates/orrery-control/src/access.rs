//! Permission resolution for models.
//!
//! A caller's level on a model is decided from stored relationships only:
//! direct ownership wins, then the strongest team grant, then public
//! readability. The resolution is side-effect-free and safe to repeat
//! inside a unit of work, which the orchestrator relies on to re-verify
//! authorisation under the row lock rather than trusting the HTTP
//! boundary's earlier answer.

use crate::error::ControlResult;
use crate::store::{ModelStore, UnitOfWork};
use crate::types::{AccessLevel, ModelRecord, Permission, UserId};

/// The pure decision function: ownership, then team grants, then
/// public-read fallback.
fn resolve(model: &ModelRecord, user: &UserId, team_grants: &[Permission]) -> Permission {
    if model.user_id == *user {
        return Permission::Owner;
    }

    let from_teams = team_grants.iter().copied().max().unwrap_or(Permission::None);
    if from_teams > Permission::None {
        return from_teams;
    }

    match model.access {
        AccessLevel::Public => Permission::Read,
        AccessLevel::Private => Permission::None,
    }
}

/// Resolve a caller's permission on a model through a plain read handle.
///
/// Used on paths that must not join a transaction (status, logs, the HTTP
/// policy layer).
pub async fn permission_level(
    store: &dyn ModelStore,
    user: &UserId,
    model: &ModelRecord,
) -> ControlResult<Permission> {
    let grants = store.team_permissions(user, &model.id).await?;
    Ok(resolve(model, user, &grants))
}

/// Resolve a caller's permission on a model inside a unit of work.
pub async fn permission_level_in(
    uow: &mut dyn UnitOfWork,
    user: &UserId,
    model: &ModelRecord,
) -> ControlResult<Permission> {
    let grants = uow.team_permissions(user, &model.id).await?;
    Ok(resolve(model, user, &grants))
}
