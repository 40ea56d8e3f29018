//! Core types for orrery-control.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an ID from an existing string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_type! {
    /// Unique identifier for a model.
    ModelId
}

id_type! {
    /// Unique identifier for a user.
    UserId
}

id_type! {
    /// Unique identifier for a team.
    TeamId
}

impl ModelId {
    /// Generate a new unique model ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }
}

/// Lifecycle status shared by training and deployment.
///
/// `Starting`, `InProgress`, and `Complete` are collectively "active" for
/// deployment purposes. `Stopped` and `Failed` are terminal until a new
/// start is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Never started.
    NotStarted,
    /// Job submitted, not yet running.
    Starting,
    /// Job running.
    InProgress,
    /// Job finished (training) or serving (deployment).
    Complete,
    /// Job failed.
    Failed,
    /// Job was explicitly stopped.
    Stopped,
}

impl Status {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the status counts as active for deployment purposes.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::InProgress | Self::Complete)
    }

    /// Whether a job callback may move this status to `next`.
    ///
    /// Callbacks only ever move a deployment forward along
    /// `Starting -> InProgress -> Complete`, or report failure from an
    /// active state. Repeating the current status is a permitted no-op.
    #[must_use]
    pub const fn can_advance_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Starting, Self::Starting | Self::InProgress | Self::Complete)
            | (Self::InProgress, Self::InProgress | Self::Complete)
            | (Self::Complete, Self::Complete) => true,
            (cur, Self::Failed) => cur.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "starting" => Ok(Self::Starting),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("unknown status: {s}")),
        }
    }
}

/// Permission level a caller holds on a model. Ordered: `None < Read < Owner`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// No access.
    #[default]
    None,
    /// May query status, logs, and clone.
    Read,
    /// May start and stop deployments.
    Owner,
}

impl Permission {
    /// Get the permission name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "owner" => Ok(Self::Owner),
            _ => Err(format!("unknown permission: {s}")),
        }
    }
}

/// Role a user holds within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    /// Ordinary member.
    Member,
    /// Team administrator.
    Admin,
}

impl TeamRole {
    /// Get the role name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for TeamRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("unknown team role: {s}")),
        }
    }
}

/// Visibility of a model to users without an explicit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Visible only via ownership or team grants.
    #[default]
    Private,
    /// Readable by any authenticated user.
    Public,
}

impl AccessLevel {
    /// Get the access level as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            _ => Err(format!("unknown access level: {s}")),
        }
    }
}

/// A model row together with optionally loaded relations.
///
/// Relations are populated according to the
/// [`QueryOptions`](crate::store::QueryOptions) passed to the store; an
/// unrequested relation is left empty rather than fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Unique model identifier.
    pub id: ModelId,
    /// Model name, unique per owning user.
    pub name: String,
    /// Free-form type tag (e.g. "ndb", "udt").
    pub model_type: String,
    /// Owning user.
    pub user_id: UserId,
    /// Set when this model was cloned from another.
    pub parent_id: Option<ModelId>,
    /// Visibility to users without an explicit grant.
    pub access: AccessLevel,
    /// Training lifecycle status.
    pub train_status: Status,
    /// Deployment lifecycle status.
    pub deploy_status: Status,
    /// Free-form attribute map (loaded on request).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Direct dependency targets (loaded on request).
    #[serde(default)]
    pub dependencies: Vec<ModelId>,
    /// Owning user row (loaded on request).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserRecord>,
    /// When the model row was created.
    pub created_at: DateTime<Utc>,
    /// When the model row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ModelRecord {
    /// The name under which this model's deployment job is keyed at the
    /// external scheduler.
    #[must_use]
    pub fn deploy_job_name(&self) -> String {
        deploy_job_name(&self.id)
    }
}

/// The scheduler job name for a model's deployment.
#[must_use]
pub fn deploy_job_name(model_id: &ModelId) -> String {
    format!("deploy-{model_id}")
}

/// A user row. Lifecycle is owned by the external identity service; the
/// control plane only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique user identifier.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Contact address.
    pub email: String,
}

/// A team row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    /// Unique team identifier.
    pub id: TeamId,
    /// Team name.
    pub name: String,
}

/// A log line reported by a running job through the callback path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    /// Model the job belongs to.
    pub model_id: ModelId,
    /// Log level as reported by the job.
    pub level: String,
    /// Log message.
    pub message: String,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Compute shape requested for one deployment job.
///
/// Ephemeral: computed per start attempt, embedded in the job submission and
/// the license check, never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// CPU-equivalent allocation units.
    pub cpu_units: u64,
    /// Baseline memory in MB.
    pub memory_mb: u64,
    /// Memory ceiling in MB.
    pub memory_max_mb: u64,
}

/// Fixed CPU baseline for deployment jobs, in allocation units.
pub const DEPLOY_CPU_UNITS: u64 = 2400;

/// Minimum baseline memory for a deployment job, in MB.
pub const MIN_DEPLOY_MEMORY_MB: u64 = 1000;

impl ResourceRequest {
    /// Build the resource shape for a deployment from the requested memory.
    ///
    /// Memory is floor-clamped, the ceiling is a fixed multiple of the
    /// baseline, and the CPU share is a fixed baseline.
    #[must_use]
    pub const fn for_deploy(memory_mb: u64) -> Self {
        let memory_mb = if memory_mb < MIN_DEPLOY_MEMORY_MB {
            MIN_DEPLOY_MEMORY_MB
        } else {
            memory_mb
        };
        Self {
            cpu_units: DEPLOY_CPU_UNITS,
            memory_mb,
            memory_max_mb: 4 * memory_mb,
        }
    }
}
