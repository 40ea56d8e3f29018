//! Orrery Control Plane
//!
//! This crate provides the deployment orchestration engine for the Orrery
//! model platform. It coordinates between the transactional store, the
//! external job scheduler, the license authority, and running jobs to start
//! and stop model deployments safely under concurrent callers.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Deployment orchestration**: expanding a start request into its
//!   dependency order and running one atomic transition per model
//! - **Access control**: resolving a caller's permission (ownership, team
//!   grants, public readability) and re-verifying it inside each
//!   transaction
//! - **Resource admission**: negotiating every job's compute shape against
//!   the license ceiling before anything reaches the scheduler
//! - **Job callbacks**: authenticating long-running jobs with model-scoped
//!   tokens so they can report status and logs back
//!
//! # State machine
//!
//! Deploy status advances forward only:
//!
//! ```text
//! NotStarted ──▶ Starting ──▶ InProgress ──▶ Complete
//!                   │              │             │
//!                   ▼              ▼             ▼
//!                Failed  ◀──── (job failure)  Stopped
//! ```
//!
//! The orchestrator writes `Starting`/`Failed`/`Stopped`; callbacks from
//! the job itself advance `Starting → InProgress → Complete` or report
//! failure. `Failed` and `Stopped` are terminal until a new start.
//!
//! The external scheduler has no two-phase commit hook, so a failed
//! submission is absorbed into a committed `Failed` status rather than
//! rolled back, while a failed cancel aborts the stop without any status
//! write.

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod access;
pub mod api;
pub mod blobs;
pub mod config;
pub mod error;
pub mod graph;
pub mod license;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod token;
pub mod types;

// Re-export commonly used types at the crate root
pub use api::{router, AppState};
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use orchestrator::{Orchestrator, SavedModel, StartRequest};
pub use scheduler::{HttpScheduler, JobScheduler, JobSpec, MockScheduler};
pub use store::{MemoryStore, ModelStore, PostgresStore, QueryOptions, UnitOfWork};
pub use token::{HsTokenSigner, TokenSigner};
pub use types::{
    AccessLevel, ModelId, ModelRecord, Permission, ResourceRequest, Status, TeamId, UserId,
};
