//! PostgreSQL model store implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::config::DatabaseConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    AccessLevel, JobLogEntry, ModelId, ModelRecord, Permission, Status, TeamId, TeamRecord,
    TeamRole, UserId, UserRecord,
};

use super::{ModelStore, QueryOptions, UnitOfWork};

const MODEL_COLUMNS: &str = "id, name, model_type, user_id, parent_id, access, \
     train_status, deploy_status, attributes, created_at, updated_at";

/// PostgreSQL-backed model store.
///
/// Row-level locking (`SELECT ... FOR UPDATE`) on the model record
/// serialises concurrent units of work against the same model.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_teams (
                team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                PRIMARY KEY (team_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                model_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                parent_id TEXT REFERENCES models(id) ON DELETE SET NULL,
                access TEXT NOT NULL,
                train_status TEXT NOT NULL,
                deploy_status TEXT NOT NULL,
                attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT models_user_id_name_key UNIQUE (user_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS model_dependencies (
                model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                dependency_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                PRIMARY KEY (model_id, dependency_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS model_teams (
                model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                permission TEXT NOT NULL,
                PRIMARY KEY (model_id, team_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS job_logs (
                id BIGSERIAL PRIMARY KEY,
                model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_model_dependencies_dependency
            ON model_dependencies (dependency_id)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_models_deploy_status
            ON models (deploy_status)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_job_logs_model
            ON job_logs (model_id, timestamp DESC)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Parse a row into a bare ModelRecord (relations unloaded).
    fn row_to_record(row: &PgRow) -> ControlResult<ModelRecord> {
        let id: String = row.get("id");
        let name: String = row.get("name");
        let model_type: String = row.get("model_type");
        let user_id: String = row.get("user_id");
        let parent_id: Option<String> = row.get("parent_id");
        let access_str: String = row.get("access");
        let train_str: String = row.get("train_status");
        let deploy_str: String = row.get("deploy_status");
        let attributes_json: serde_json::Value = row.get("attributes");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let access: AccessLevel = access_str.parse().map_err(ControlError::Serialisation)?;
        let train_status: Status = train_str.parse().map_err(ControlError::Serialisation)?;
        let deploy_status: Status = deploy_str.parse().map_err(ControlError::Serialisation)?;
        let attributes: BTreeMap<String, String> = serde_json::from_value(attributes_json)
            .map_err(|e| {
                ControlError::Serialisation(format!("failed to deserialise attributes: {e}"))
            })?;

        Ok(ModelRecord {
            id: ModelId::new(id),
            name,
            model_type,
            user_id: UserId::new(user_id),
            parent_id: parent_id.map(ModelId::new),
            access,
            train_status,
            deploy_status,
            attributes,
            dependencies: Vec::new(),
            owner: None,
            created_at,
            updated_at,
        })
    }
}

/// Map an insert failure, converting a (user, name) unique violation into
/// the domain's duplicate-name error.
fn map_insert_err(name: &str, err: sqlx::Error) -> ControlError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() && db.constraint() == Some("models_user_id_name_key") {
            return ControlError::DuplicateName(name.to_owned());
        }
    }
    ControlError::Database(err)
}

/// Fetch a model row (optionally locked) and its requested relations on one
/// connection.
async fn fetch_model(
    conn: &mut sqlx::PgConnection,
    id: &ModelId,
    opts: &QueryOptions,
    lock: bool,
) -> ControlResult<Option<ModelRecord>> {
    let sql = if lock {
        format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = $1")
    };

    let row = sqlx::query(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut record = PostgresStore::row_to_record(&row)?;

    if opts.include_dependencies {
        let rows = sqlx::query(
            "SELECT dependency_id FROM model_dependencies WHERE model_id = $1 ORDER BY dependency_id",
        )
        .bind(record.id.as_str())
        .fetch_all(&mut *conn)
        .await?;
        record.dependencies = rows
            .iter()
            .map(|r| ModelId::new(r.get::<String, _>("dependency_id")))
            .collect();
    }

    if opts.include_owner {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
            .bind(record.user_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        record.owner = row.map(|r| UserRecord {
            id: UserId::new(r.get::<String, _>("id")),
            username: r.get("username"),
            email: r.get("email"),
        });
    }

    if !opts.include_attributes {
        record.attributes.clear();
    }

    Ok(Some(record))
}

async fn insert_model_with(
    conn: &mut sqlx::PgConnection,
    record: &ModelRecord,
) -> ControlResult<()> {
    let attributes_json = serde_json::to_value(&record.attributes)
        .map_err(|e| ControlError::Serialisation(format!("failed to serialise attributes: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO models (
            id, name, model_type, user_id, parent_id, access,
            train_status, deploy_status, attributes, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(record.id.as_str())
    .bind(&record.name)
    .bind(&record.model_type)
    .bind(record.user_id.as_str())
    .bind(record.parent_id.as_ref().map(ModelId::as_str))
    .bind(record.access.as_str())
    .bind(record.train_status.as_str())
    .bind(record.deploy_status.as_str())
    .bind(&attributes_json)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_insert_err(&record.name, e))?;

    for dependency in &record.dependencies {
        sqlx::query(
            "INSERT INTO model_dependencies (model_id, dependency_id) VALUES ($1, $2)",
        )
        .bind(record.id.as_str())
        .bind(dependency.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

const TEAM_PERMISSIONS_SQL: &str = r#"
    SELECT mt.permission
    FROM model_teams mt
    INNER JOIN user_teams ut ON ut.team_id = mt.team_id
    WHERE ut.user_id = $1 AND mt.model_id = $2
"#;

fn rows_to_permissions(rows: &[PgRow]) -> ControlResult<Vec<Permission>> {
    rows.iter()
        .map(|r| {
            r.get::<String, _>("permission")
                .parse()
                .map_err(ControlError::Serialisation)
        })
        .collect()
}

#[async_trait]
impl ModelStore for PostgresStore {
    async fn begin(&self) -> ControlResult<Box<dyn UnitOfWork>> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { txn }))
    }

    async fn get_model(
        &self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_model(&mut conn, id, opts, false).await
    }

    async fn get_user(&self, id: &UserId) -> ControlResult<Option<UserRecord>> {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| UserRecord {
            id: UserId::new(r.get::<String, _>("id")),
            username: r.get("username"),
            email: r.get("email"),
        }))
    }

    async fn model_exists(&self, id: &ModelId) -> ControlResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM models WHERE id = $1) AS present")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("present"))
    }

    async fn team_permissions(
        &self,
        user: &UserId,
        model: &ModelId,
    ) -> ControlResult<Vec<Permission>> {
        let rows = sqlx::query(TEAM_PERMISSIONS_SQL)
            .bind(user.as_str())
            .bind(model.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows_to_permissions(&rows)
    }

    async fn list_job_logs(&self, model: &ModelId, limit: u32) -> ControlResult<Vec<JobLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT model_id, level, message, timestamp
            FROM job_logs
            WHERE model_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(model.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| JobLogEntry {
                model_id: ModelId::new(r.get::<String, _>("model_id")),
                level: r.get("level"),
                message: r.get("message"),
                timestamp: r.get("timestamp"),
            })
            .collect())
    }

    async fn insert_user(&self, user: &UserRecord) -> ControlResult<()> {
        sqlx::query("INSERT INTO users (id, username, email) VALUES ($1, $2, $3)")
            .bind(user.id.as_str())
            .bind(&user.username)
            .bind(&user.email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_team(&self, team: &TeamRecord) -> ControlResult<()> {
        sqlx::query("INSERT INTO teams (id, name) VALUES ($1, $2)")
            .bind(team.id.as_str())
            .bind(&team.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_team_member(
        &self,
        team: &TeamId,
        user: &UserId,
        role: TeamRole,
    ) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_teams (team_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (team_id, user_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(team.as_str())
        .bind(user.as_str())
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn grant_model_permission(
        &self,
        model: &ModelId,
        team: &TeamId,
        permission: Permission,
    ) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO model_teams (model_id, team_id, permission)
            VALUES ($1, $2, $3)
            ON CONFLICT (model_id, team_id) DO UPDATE SET permission = EXCLUDED.permission
            "#,
        )
        .bind(model.as_str())
        .bind(team.as_str())
        .bind(permission.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_model(&self, record: &ModelRecord) -> ControlResult<()> {
        // One transaction so the row and its dependency edges land together.
        let mut txn = self.pool.begin().await?;
        insert_model_with(&mut txn, record).await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Unit of work backed by a PostgreSQL transaction.
///
/// Dropping without commit rolls back via sqlx's transaction guard.
struct PgUnitOfWork {
    txn: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_model(
        &mut self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>> {
        fetch_model(&mut self.txn, id, opts, true).await
    }

    async fn get_model(
        &mut self,
        id: &ModelId,
        opts: &QueryOptions,
    ) -> ControlResult<Option<ModelRecord>> {
        fetch_model(&mut self.txn, id, opts, false).await
    }

    async fn count_active_dependents(&mut self, model: &ModelId) -> ControlResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT m.id) AS dependents
            FROM model_dependencies d
            INNER JOIN models m ON m.id = d.model_id
            WHERE d.dependency_id = $1
              AND m.deploy_status IN ('starting', 'in_progress', 'complete')
            "#,
        )
        .bind(model.as_str())
        .fetch_one(&mut *self.txn)
        .await?;

        let count: i64 = row.get("dependents");
        Ok(count.unsigned_abs())
    }

    async fn team_permissions(
        &mut self,
        user: &UserId,
        model: &ModelId,
    ) -> ControlResult<Vec<Permission>> {
        let rows = sqlx::query(TEAM_PERMISSIONS_SQL)
            .bind(user.as_str())
            .bind(model.as_str())
            .fetch_all(&mut *self.txn)
            .await?;
        rows_to_permissions(&rows)
    }

    async fn update_deploy_status(&mut self, id: &ModelId, status: Status) -> ControlResult<()> {
        let result =
            sqlx::query("UPDATE models SET deploy_status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(id.as_str())
                .execute(&mut *self.txn)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::model_not_found(id));
        }
        Ok(())
    }

    async fn model_name_taken(&mut self, user: &UserId, name: &str) -> ControlResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM models WHERE user_id = $1 AND name = $2) AS present",
        )
        .bind(user.as_str())
        .bind(name)
        .fetch_one(&mut *self.txn)
        .await?;
        Ok(row.get("present"))
    }

    async fn insert_model(&mut self, record: &ModelRecord) -> ControlResult<()> {
        insert_model_with(&mut *self.txn, record).await
    }

    async fn append_job_log(&mut self, entry: &JobLogEntry) -> ControlResult<()> {
        sqlx::query(
            "INSERT INTO job_logs (model_id, level, message, timestamp) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.model_id.as_str())
        .bind(&entry.level)
        .bind(&entry.message)
        .bind(entry.timestamp)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> ControlResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ControlResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}
