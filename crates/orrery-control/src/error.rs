//! Error types for orrery-control.

use std::fmt;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-database persistence failure (lock poisoning, commit bookkeeping).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A referenced user, model, or team does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("model", "user", "team").
        kind: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// Caller lacks the permission level the operation requires.
    #[error("user {user} does not have {required} permission on model {model}")]
    PermissionDenied {
        /// Caller identifier.
        user: String,
        /// Target model identifier.
        model: String,
        /// Permission level the operation required.
        required: &'static str,
    },

    /// The model is not in a state that permits the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A model cannot be stopped while active models depend on it.
    #[error("cannot stop model {model}: used as a dependency by {dependents} active model(s)")]
    DependencyInUse {
        /// Model that was asked to stop.
        model: String,
        /// Number of active direct dependents.
        dependents: u64,
    },

    /// The dependency graph contains a cycle. Model graphs are required to be
    /// acyclic, so this is a data-integrity fault, not a user error.
    #[error("cyclic dependency detected at model {0}")]
    CyclicDependency(String),

    /// The license authority denied the requested allocation.
    #[error("license quota exceeded: requested {requested} units with {allocated} of {limit} already allocated")]
    QuotaExceeded {
        /// Units requested for the new job.
        requested: u64,
        /// Units currently allocated on the cluster.
        allocated: u64,
        /// Licensed ceiling.
        limit: u64,
    },

    /// Submit/cancel/log transport or remote failure at the external scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// The caller already owns a model with the requested name.
    #[error("a model named {0} already exists for this user")]
    DuplicateName(String),

    /// Token minting or verification failure.
    #[error("token error: {0}")]
    Token(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Blob storage error.
    #[error("blob storage error: {0}")]
    Blob(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A start attempt where both the status write and the scheduler
    /// submission failed independently. Both causes are preserved.
    #[error("start failed on both fronts: status write: {status_write}; scheduler: {scheduler}")]
    StartFailure {
        /// The storage-side failure.
        status_write: Box<ControlError>,
        /// The scheduler-side failure.
        scheduler: Box<ControlError>,
    },
}

impl ControlError {
    /// Create a not-found error for a model.
    #[must_use]
    pub fn model_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: "model",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a user.
    #[must_use]
    pub fn user_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: "user",
            id: id.to_string(),
        }
    }

    /// Create a scheduler error.
    #[must_use]
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Create a persistence error.
    #[must_use]
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an invalid-state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a token error.
    #[must_use]
    pub fn token(msg: impl Into<String>) -> Self {
        Self::Token(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_failure_reports_both_causes() {
        let err = ControlError::StartFailure {
            status_write: Box::new(ControlError::persistence("commit refused")),
            scheduler: Box::new(ControlError::scheduler("connection reset")),
        };

        let text = err.to_string();
        assert!(text.contains("commit refused"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn permission_denied_names_user_and_model() {
        let err = ControlError::PermissionDenied {
            user: "u1".to_owned(),
            model: "m1".to_owned(),
            required: "owner",
        };
        let text = err.to_string();
        assert!(text.contains("u1"));
        assert!(text.contains("m1"));
        assert!(text.contains("owner"));
    }
}
