//! In-memory model store for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{ControlError, ControlResult};
use crate::types::{
    JobLogEntry, ModelId, ModelRecord, Permission, Status, TeamId, TeamRecord, TeamRole, UserId,
    UserRecord,
};

use super::{ModelStore, QueryOptions, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct State {
    models: HashMap<String, ModelRecord>,
    users: HashMap<String, UserRecord>,
    teams: HashMap<String, TeamRecord>,
    // (team_id, user_id) -> role
    memberships: HashMap<(String, String), TeamRole>,
    // (model_id, team_id) -> permission
    grants: HashMap<(String, String), Permission>,
    job_logs: Vec<JobLogEntry>,
}

fn apply_opts(state: &State, record: &ModelRecord, opts: &QueryOptions) -> ModelRecord {
    let mut out = record.clone();
    if !opts.include_dependencies {
        out.dependencies.clear();
    }
    if !opts.include_attributes {
        out.attributes.clear();
    }
    out.owner = if opts.include_owner {
        state.users.get(record.user_id.as_str()).cloned()
    } else {
        None
    };
    out
}

fn team_permissions_in(state: &State, user: &UserId, model: &ModelId) -> Vec<Permission> {
    state
        .memberships
        .keys()
        .filter(|(_, uid)| uid == user.as_str())
        .filter_map(|(team_id, _)| {
            state
                .grants
                .get(&(model.as_str().to_owned(), team_id.clone()))
                .copied()
        })
        .collect()
}

fn insert_model_in(state: &mut State, record: &ModelRecord) -> ControlResult<()> {
    if state.models.contains_key(record.id.as_str()) {
        return Err(ControlError::persistence(format!(
            "model {} already exists",
            record.id
        )));
    }
    let name_taken = state
        .models
        .values()
        .any(|m| m.user_id == record.user_id && m.name == record.name);
    if name_taken {
        return Err(ControlError::DuplicateName(record.name.clone()));
    }
    let mut stored = record.clone();
    stored.owner = None;
    state.models.insert(record.id.as_str().to_owned(), stored);
    Ok(())
}

/// In-memory model store for testing.
///
/// Rather than row-level locks, a unit of work holds the single store-wide
/// mutex until commit or rollback. That is coarser than the PostgreSQL
/// backend but gives the same observable serialisation: two units of work
/// touching the same model never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn begin(&self) -> ControlResult<Box<dyn UnitOfWork>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            snapshot: Some(snapshot),
            committed: false,
        }))
    }

    async fn get_model(
        &self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .models
            .get(id.as_str())
            .map(|m| apply_opts(&state, m, opts)))
    }

    async fn get_user(&self, id: &UserId) -> ControlResult<Option<UserRecord>> {
        let state = self.state.lock().await;
        Ok(state.users.get(id.as_str()).cloned())
    }

    async fn model_exists(&self, id: &ModelId) -> ControlResult<bool> {
        let state = self.state.lock().await;
        Ok(state.models.contains_key(id.as_str()))
    }

    async fn team_permissions(
        &self,
        user: &UserId,
        model: &ModelId,
    ) -> ControlResult<Vec<Permission>> {
        let state = self.state.lock().await;
        Ok(team_permissions_in(&state, user, model))
    }

    async fn list_job_logs(&self, model: &ModelId, limit: u32) -> ControlResult<Vec<JobLogEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .job_logs
            .iter()
            .filter(|e| e.model_id == *model)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn insert_user(&self, user: &UserRecord) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        state
            .users
            .insert(user.id.as_str().to_owned(), user.clone());
        Ok(())
    }

    async fn insert_team(&self, team: &TeamRecord) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        state
            .teams
            .insert(team.id.as_str().to_owned(), team.clone());
        Ok(())
    }

    async fn add_team_member(
        &self,
        team: &TeamId,
        user: &UserId,
        role: TeamRole,
    ) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        state
            .memberships
            .insert((team.as_str().to_owned(), user.as_str().to_owned()), role);
        Ok(())
    }

    async fn grant_model_permission(
        &self,
        model: &ModelId,
        team: &TeamId,
        permission: Permission,
    ) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        state.grants.insert(
            (model.as_str().to_owned(), team.as_str().to_owned()),
            permission,
        );
        Ok(())
    }

    async fn insert_model(&self, record: &ModelRecord) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        insert_model_in(&mut state, record)
    }
}

/// Unit of work over the in-memory store.
///
/// Mutations apply directly to the guarded state; a snapshot taken at begin
/// is restored on drop unless the unit of work was committed.
struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    snapshot: Option<State>,
    committed: bool,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(snapshot) = self.snapshot.take() {
                *self.guard = snapshot;
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_model(
        &mut self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>> {
        // The store-wide mutex is already held for the lifetime of this
        // unit of work, which subsumes the row lock.
        self.get_model(id, opts).await
    }

    async fn get_model(
        &mut self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>> {
        Ok(self
            .guard
            .models
            .get(id.as_str())
            .map(|m| apply_opts(&self.guard, m, opts)))
    }

    async fn count_active_dependents(&mut self, model: &ModelId) -> ControlResult<u64> {
        let count = self
            .guard
            .models
            .values()
            .filter(|m| m.deploy_status.is_active() && m.dependencies.contains(model))
            .count();
        Ok(count as u64)
    }

    async fn team_permissions(
        &mut self,
        user: &UserId,
        model: &ModelId,
    ) -> ControlResult<Vec<Permission>> {
        Ok(team_permissions_in(&self.guard, user, model))
    }

    async fn update_deploy_status(&mut self, id: &ModelId, status: Status) -> ControlResult<()> {
        let record = self
            .guard
            .models
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::model_not_found(id))?;
        record.deploy_status = status;
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn model_name_taken(&mut self, user: &UserId, name: &str) -> ControlResult<bool> {
        Ok(self
            .guard
            .models
            .values()
            .any(|m| m.user_id == *user && m.name == name))
    }

    async fn insert_model(&mut self, record: &ModelRecord) -> ControlResult<()> {
        insert_model_in(&mut self.guard, record)
    }

    async fn append_job_log(&mut self, entry: &JobLogEntry) -> ControlResult<()> {
        self.guard.job_logs.push(entry.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> ControlResult<()> {
        self.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ControlResult<()> {
        // Dropping without commit restores the snapshot.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccessLevel;
    use std::collections::BTreeMap;

    fn test_model(id: &str, user: &str, name: &str) -> ModelRecord {
        let now = chrono::Utc::now();
        ModelRecord {
            id: ModelId::new(id),
            name: name.to_owned(),
            model_type: "ndb".to_owned(),
            user_id: UserId::new(user),
            parent_id: None,
            access: AccessLevel::Private,
            train_status: Status::Complete,
            deploy_status: Status::NotStarted,
            attributes: BTreeMap::from([("shards".to_owned(), "2".to_owned())]),
            dependencies: Vec::new(),
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        let record = test_model("m1", "u1", "search");
        store.insert_model(&record).await.expect("insert failed");

        let fetched = store
            .get_model(&record.id, &QueryOptions::bare().with_attributes())
            .await
            .expect("get failed")
            .expect("model not found");
        assert_eq!(fetched.name, "search");
        assert_eq!(fetched.attributes.get("shards").map(String::as_str), Some("2"));

        let bare = store
            .get_model(&record.id, &QueryOptions::bare())
            .await
            .expect("get failed")
            .expect("model not found");
        assert!(bare.attributes.is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_rejected() {
        let store = MemoryStore::new();
        store
            .insert_model(&test_model("m1", "u1", "search"))
            .await
            .expect("insert failed");

        let result = store.insert_model(&test_model("m2", "u1", "search")).await;
        assert!(matches!(result, Err(ControlError::DuplicateName(_))));

        // Same name under a different user is fine.
        store
            .insert_model(&test_model("m3", "u2", "search"))
            .await
            .expect("insert failed");
    }

    #[tokio::test]
    async fn uncommitted_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        let record = test_model("m1", "u1", "search");
        store.insert_model(&record).await.expect("insert failed");

        {
            let mut uow = store.begin().await.expect("begin failed");
            uow.update_deploy_status(&record.id, Status::Starting)
                .await
                .expect("update failed");
            // Dropped without commit.
        }

        let fetched = store
            .get_model(&record.id, &QueryOptions::bare())
            .await
            .expect("get failed")
            .expect("model not found");
        assert_eq!(fetched.deploy_status, Status::NotStarted);
    }

    #[tokio::test]
    async fn committed_unit_of_work_persists() {
        let store = MemoryStore::new();
        let record = test_model("m1", "u1", "search");
        store.insert_model(&record).await.expect("insert failed");

        let mut uow = store.begin().await.expect("begin failed");
        uow.update_deploy_status(&record.id, Status::Starting)
            .await
            .expect("update failed");
        uow.commit().await.expect("commit failed");

        let fetched = store
            .get_model(&record.id, &QueryOptions::bare())
            .await
            .expect("get failed")
            .expect("model not found");
        assert_eq!(fetched.deploy_status, Status::Starting);
    }

    #[tokio::test]
    async fn count_active_dependents_only_counts_active() {
        let store = MemoryStore::new();
        let base = test_model("base", "u1", "base");
        store.insert_model(&base).await.expect("insert failed");

        let mut active_dep = test_model("d1", "u1", "dep-active");
        active_dep.dependencies.push(base.id.clone());
        active_dep.deploy_status = Status::InProgress;
        store.insert_model(&active_dep).await.expect("insert failed");

        let mut stopped_dep = test_model("d2", "u1", "dep-stopped");
        stopped_dep.dependencies.push(base.id.clone());
        stopped_dep.deploy_status = Status::Stopped;
        store.insert_model(&stopped_dep).await.expect("insert failed");

        let mut uow = store.begin().await.expect("begin failed");
        let count = uow
            .count_active_dependents(&base.id)
            .await
            .expect("count failed");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn team_permissions_follow_membership_and_grants() {
        let store = MemoryStore::new();
        let model = test_model("m1", "owner", "search");
        store.insert_model(&model).await.expect("insert failed");

        let team = TeamRecord {
            id: TeamId::new("t1"),
            name: "ml".to_owned(),
        };
        store.insert_team(&team).await.expect("insert failed");
        store
            .add_team_member(&team.id, &UserId::new("u2"), TeamRole::Member)
            .await
            .expect("add failed");
        store
            .grant_model_permission(&model.id, &team.id, Permission::Read)
            .await
            .expect("grant failed");

        let perms = store
            .team_permissions(&UserId::new("u2"), &model.id)
            .await
            .expect("lookup failed");
        assert_eq!(perms, vec![Permission::Read]);

        let none = store
            .team_permissions(&UserId::new("outsider"), &model.id)
            .await
            .expect("lookup failed");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn user_and_model_lookups() {
        let store = MemoryStore::new();
        let user = UserRecord {
            id: UserId::new("u1"),
            username: "ada".to_owned(),
            email: "ada@example.com".to_owned(),
        };
        store.insert_user(&user).await.expect("insert failed");
        store
            .insert_model(&test_model("m1", "u1", "search"))
            .await
            .expect("insert failed");

        assert!(store
            .model_exists(&ModelId::new("m1"))
            .await
            .expect("lookup failed"));
        assert!(!store
            .model_exists(&ModelId::new("ghost"))
            .await
            .expect("lookup failed"));

        let fetched = store
            .get_user(&UserId::new("u1"))
            .await
            .expect("lookup failed")
            .expect("user missing");
        assert_eq!(fetched.username, "ada");

        // Owner relation loads on request.
        let with_owner = store
            .get_model(&ModelId::new("m1"), &QueryOptions::bare().with_owner())
            .await
            .expect("get failed")
            .expect("model missing");
        assert_eq!(
            with_owner.owner.map(|o| o.username),
            Some("ada".to_owned())
        );
    }

    #[tokio::test]
    async fn job_logs_newest_first() {
        let store = MemoryStore::new();
        let id = ModelId::new("m1");

        let mut uow = store.begin().await.expect("begin failed");
        for i in 0..3 {
            uow.append_job_log(&JobLogEntry {
                model_id: id.clone(),
                level: "info".to_owned(),
                message: format!("line {i}"),
                timestamp: chrono::Utc::now() + chrono::Duration::seconds(i),
            })
            .await
            .expect("append failed");
        }
        uow.commit().await.expect("commit failed");

        let logs = store.list_job_logs(&id, 2).await.expect("list failed");
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "line 2");
    }
}
