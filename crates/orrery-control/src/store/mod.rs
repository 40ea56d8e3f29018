//! Model storage backends.
//!
//! This module provides traits and implementations for persisting platform
//! state. The primary implementation uses PostgreSQL; an in-memory
//! implementation is provided for testing.
//!
//! Mutating operations go through an explicit [`UnitOfWork`]: a transaction
//! handle passed by reference into every function that must share the same
//! atomic boundary. Read-only queries that must *not* join a transaction
//! take the plain [`ModelStore`] handle instead.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::{
    JobLogEntry, ModelId, ModelRecord, Permission, Status, TeamId, TeamRecord, TeamRole, UserId,
    UserRecord,
};

/// Which model relations to load alongside the row.
///
/// Enumerated per call site so the repository implementation decides the
/// fetch strategy; an unrequested relation is left empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Load the model's direct dependency edges.
    pub include_dependencies: bool,
    /// Load the model's attribute map.
    pub include_attributes: bool,
    /// Load the owning user row.
    pub include_owner: bool,
}

impl QueryOptions {
    /// Load the bare row only.
    #[must_use]
    pub const fn bare() -> Self {
        Self {
            include_dependencies: false,
            include_attributes: false,
            include_owner: false,
        }
    }

    /// Also load dependency edges.
    #[must_use]
    pub const fn with_dependencies(mut self) -> Self {
        self.include_dependencies = true;
        self
    }

    /// Also load the attribute map.
    #[must_use]
    pub const fn with_attributes(mut self) -> Self {
        self.include_attributes = true;
        self
    }

    /// Also load the owning user.
    #[must_use]
    pub const fn with_owner(mut self) -> Self {
        self.include_owner = true;
        self
    }
}

/// Backend for platform state.
///
/// Methods on this trait are plain reads (or standalone writes used by the
/// identity collaborator and test fixtures) outside any transaction. All
/// orchestration writes happen through a [`UnitOfWork`] obtained from
/// [`ModelStore::begin`].
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> ControlResult<Box<dyn UnitOfWork>>;

    /// Fetch a model by ID. Returns `None` if it does not exist.
    async fn get_model(
        &self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>>;

    /// Fetch a user by ID. Returns `None` if it does not exist.
    async fn get_user(&self, id: &UserId) -> ControlResult<Option<UserRecord>>;

    /// Check whether a model exists.
    async fn model_exists(&self, id: &ModelId) -> ControlResult<bool>;

    /// Permissions granted on `model` to any team `user` belongs to.
    ///
    /// One entry per grant; the access gate takes the maximum.
    async fn team_permissions(
        &self,
        user: &UserId,
        model: &ModelId,
    ) -> ControlResult<Vec<Permission>>;

    /// Most recent job log entries for a model, newest first.
    async fn list_job_logs(&self, model: &ModelId, limit: u32) -> ControlResult<Vec<JobLogEntry>>;

    /// Insert a user row. Called by the identity collaborator, not by the
    /// orchestration core.
    async fn insert_user(&self, user: &UserRecord) -> ControlResult<()>;

    /// Insert a team row.
    async fn insert_team(&self, team: &TeamRecord) -> ControlResult<()>;

    /// Add a user to a team with the given role.
    async fn add_team_member(
        &self,
        team: &TeamId,
        user: &UserId,
        role: TeamRole,
    ) -> ControlResult<()>;

    /// Grant a team a permission level on a model.
    async fn grant_model_permission(
        &self,
        model: &ModelId,
        team: &TeamId,
        permission: Permission,
    ) -> ControlResult<()>;

    /// Insert a model row with its attributes and dependency edges, outside
    /// any unit of work. Used by model registration and test fixtures.
    async fn insert_model(&self, record: &ModelRecord) -> ControlResult<()>;
}

/// One atomic boundary over the store.
///
/// Dropping a unit of work without committing rolls it back. Row locks
/// taken by [`UnitOfWork::lock_model`] are held until commit or rollback;
/// concurrent units of work against the same model serialise on that lock.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Fetch a model and take a row lock on it for the remainder of this
    /// unit of work. Returns `None` if the model does not exist.
    async fn lock_model(
        &mut self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>>;

    /// Fetch a model without locking it.
    async fn get_model(
        &mut self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>>;

    /// Count distinct models with an edge onto `model` whose deploy status
    /// is currently active.
    async fn count_active_dependents(&mut self, model: &ModelId) -> ControlResult<u64>;

    /// Permissions granted on `model` to any team `user` belongs to, read
    /// inside this unit of work.
    async fn team_permissions(
        &mut self,
        user: &UserId,
        model: &ModelId,
    ) -> ControlResult<Vec<Permission>>;

    /// Set a model's deploy status.
    async fn update_deploy_status(&mut self, id: &ModelId, status: Status) -> ControlResult<()>;

    /// Whether `user` already owns a model named `name`.
    async fn model_name_taken(&mut self, user: &UserId, name: &str) -> ControlResult<bool>;

    /// Insert a model row with its attributes and dependency edges.
    async fn insert_model(&mut self, record: &ModelRecord) -> ControlResult<()>;

    /// Append a job log entry.
    async fn append_job_log(&mut self, entry: &JobLogEntry) -> ControlResult<()>;

    /// Commit the unit of work.
    async fn commit(self: Box<Self>) -> ControlResult<()>;

    /// Roll the unit of work back explicitly.
    async fn rollback(self: Box<Self>) -> ControlResult<()>;
}
