//! Core deployment orchestration logic.
//!
//! The orchestrator owns every deploy-status transition. Each per-model
//! transition runs inside one unit of work holding the model's row lock, so
//! concurrent operations against the same model serialise on the store and
//! the second caller observes the first's outcome. The external scheduler
//! sits inside the transition's logical scope but outside its atomicity: a
//! failed submission is absorbed into a committed `Failed` status (the
//! scheduler has no two-phase commit hook to enrol in), while a failed
//! cancel aborts the whole stop so the system never claims a job stopped
//! that is still running.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::access;
use crate::blobs::ConfigStore;
use crate::config::JobsConfig;
use crate::error::{ControlError, ControlResult};
use crate::graph;
use crate::license::Negotiator;
use crate::scheduler::{JobScheduler, JobSpec};
use crate::store::{ModelStore, QueryOptions, UnitOfWork};
use crate::token::{job_token_ttl, update_token_ttl, TokenSigner, MODEL_CLAIM};
use crate::types::{
    JobLogEntry, ModelId, ModelRecord, Permission, ResourceRequest, Status, UserId,
};

/// Parameters of a start request.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Descriptive name for the requested model's deployment. Applied only
    /// to the originally requested model, never to its dependencies.
    pub deployment_name: String,
    /// Whether the scheduler may scale replicas.
    pub autoscaling_enabled: bool,
    /// Replica ceiling when autoscaling (floor-clamped to 1).
    pub autoscaling_max: u32,
    /// Requested baseline memory in MB (floor-clamped).
    pub memory_mb: u64,
}

/// Outcome of one per-model transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOutcome {
    /// A job was submitted and the model is now `Starting`.
    Submitted,
    /// The model was already active; nothing was done.
    AlreadyActive,
}

/// Result of cloning a deployed model.
#[derive(Debug, Clone)]
pub struct SavedModel {
    /// Identifier of the new model.
    pub model_id: ModelId,
    /// Short-lived token the caller uses to finish the update handshake.
    pub update_token: String,
}

/// Composes the store, scheduler, license negotiator, and token issuer
/// into the start/stop state machine.
pub struct Orchestrator {
    store: Arc<dyn ModelStore>,
    scheduler: Arc<dyn JobScheduler>,
    configs: Arc<dyn ConfigStore>,
    negotiator: Negotiator,
    job_tokens: Arc<dyn TokenSigner>,
    jobs: JobsConfig,
}

impl Orchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn ModelStore>,
        scheduler: Arc<dyn JobScheduler>,
        configs: Arc<dyn ConfigStore>,
        negotiator: Negotiator,
        job_tokens: Arc<dyn TokenSigner>,
        jobs: JobsConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            configs,
            negotiator,
            job_tokens,
            jobs,
        }
    }

    /// Start a model's deployment, dependencies first.
    ///
    /// The model is expanded into its full dependency order and each member
    /// runs one atomic transition. The operation aborts at the first
    /// per-model failure; dependencies that already started stay up, since
    /// they may be shared with other active models.
    pub async fn start(
        &self,
        model_id: &ModelId,
        caller: &UserId,
        request: &StartRequest,
    ) -> ControlResult<()> {
        info!(
            model_id = %model_id,
            user_id = %caller,
            autoscaling = request.autoscaling_enabled,
            memory_mb = request.memory_mb,
            deployment_name = %request.deployment_name,
            "starting deployment"
        );

        let order = graph::expand_for_deploy(self.store.as_ref(), model_id).await?;

        for member in &order {
            let deployment_name = if member == model_id {
                request.deployment_name.as_str()
            } else {
                ""
            };
            self.start_one(member, caller, request, deployment_name)
                .await?;
        }

        info!(model_id = %model_id, "deployment started");
        Ok(())
    }

    /// One atomic transition: authorise, validate, negotiate the license,
    /// submit, and record the outcome, all under the model's row lock.
    async fn start_one(
        &self,
        model_id: &ModelId,
        caller: &UserId,
        request: &StartRequest,
        deployment_name: &str,
    ) -> ControlResult<StartOutcome> {
        let mut uow = self.store.begin().await?;

        let model = uow
            .lock_model(model_id, &QueryOptions::bare().with_attributes())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;

        // Re-verified under the row lock: a grant revoked after the HTTP
        // boundary's check must not still start a job.
        require_permission(&mut *uow, caller, &model, Permission::Owner).await?;

        if model.train_status != Status::Complete {
            return Err(ControlError::invalid_state(format!(
                "cannot deploy model {} with train status {}",
                model.id, model.train_status
            )));
        }

        if model.deploy_status.is_active() {
            debug!(model_id = %model.id, status = %model.deploy_status, "already deployed, skipping");
            uow.rollback().await?;
            return Ok(StartOutcome::AlreadyActive);
        }

        let resources = ResourceRequest::for_deploy(request.memory_mb);
        let grant = self.negotiator.authorize(resources.cpu_units).await?;

        let job_token = self
            .job_tokens
            .issue(MODEL_CLAIM, model.id.as_str(), job_token_ttl())?;

        let document = serde_json::json!({
            "model_id": model.id,
            "model_type": model.model_type,
            "options": model.attributes,
            "control_endpoint": self.jobs.callback_url,
            "license_key": grant.license_key,
            "job_token": job_token,
            "autoscaling_enabled": request.autoscaling_enabled,
        });
        let config_path = self
            .configs
            .put(&format!("configs/{}/deploy.json", model.id), &document)
            .await?;

        let spec = JobSpec {
            job_name: model.deploy_job_name(),
            model_id: model.id.clone(),
            config_path,
            deployment_name: deployment_name.to_owned(),
            autoscaling_enabled: request.autoscaling_enabled,
            autoscaling_max: request.autoscaling_max.max(1),
            resources,
            driver: self.jobs.driver.clone(),
            license_key: grant.license_key,
        };

        // The submission happens inside the transition's logical scope but
        // is not covered by its atomicity: on failure the unit of work
        // still commits, recording `Failed` instead of `Starting`.
        let submit_result = self.scheduler.submit(&spec).await;

        let new_status = match &submit_result {
            Ok(()) => Status::Starting,
            Err(err) => {
                warn!(model_id = %model.id, error = %err, "job submission failed, recording failure");
                Status::Failed
            }
        };

        let write_result = match uow.update_deploy_status(&model.id, new_status).await {
            Ok(()) => uow.commit().await,
            Err(err) => Err(err),
        };

        match (write_result, submit_result) {
            (Ok(()), Ok(())) => {
                info!(model_id = %model.id, "job submitted");
                Ok(StartOutcome::Submitted)
            }
            (Ok(()), Err(scheduler)) => Err(scheduler),
            (Err(status_write), Ok(())) => Err(status_write),
            (Err(status_write), Err(scheduler)) => Err(ControlError::StartFailure {
                status_write: Box::new(status_write),
                scheduler: Box::new(scheduler),
            }),
        }
    }

    /// Stop a model's deployment.
    ///
    /// The model's row lock is taken before the active-dependent count and
    /// held across the external cancel, so a concurrent start of a
    /// dependent cannot slip between the check and the cancel. A cancel
    /// failure aborts the transaction: the model stays active rather than
    /// being falsely recorded as stopped.
    pub async fn stop(&self, model_id: &ModelId, caller: &UserId) -> ControlResult<()> {
        info!(model_id = %model_id, user_id = %caller, "stopping deployment");

        let mut uow = self.store.begin().await?;

        let model = uow
            .lock_model(model_id, &QueryOptions::bare())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;

        require_permission(&mut *uow, caller, &model, Permission::Owner).await?;

        let dependents = uow.count_active_dependents(model_id).await?;
        if dependents != 0 {
            return Err(ControlError::DependencyInUse {
                model: model_id.to_string(),
                dependents,
            });
        }

        self.scheduler.cancel(&model.deploy_job_name()).await?;

        uow.update_deploy_status(model_id, Status::Stopped).await?;
        uow.commit().await?;

        info!(model_id = %model_id, "deployment stopped");
        Ok(())
    }

    /// Current deploy status of a model. Pure read, no transaction.
    pub async fn status(&self, model_id: &ModelId) -> ControlResult<Status> {
        let model = self
            .store
            .get_model(model_id, &QueryOptions::bare())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;
        Ok(model.deploy_status)
    }

    /// Proxy the scheduler's log output for a model's job.
    pub async fn logs(&self, model_id: &ModelId) -> ControlResult<String> {
        let model = self
            .store
            .get_model(model_id, &QueryOptions::bare())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;
        self.scheduler.fetch_logs(&model.deploy_job_name()).await
    }

    /// Apply a status advance reported by a job callback.
    ///
    /// `token_model` is the model the presented job token is bound to; it
    /// must name the same model the callback targets. Advances are
    /// monotonic: a callback can move a deployment forward or mark it
    /// failed, never backwards.
    pub async fn advance_status(
        &self,
        token_model: &ModelId,
        model_id: &ModelId,
        next: Status,
    ) -> ControlResult<()> {
        require_token_binding(token_model, model_id)?;

        let mut uow = self.store.begin().await?;

        let model = uow
            .lock_model(model_id, &QueryOptions::bare())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;

        if !model.deploy_status.can_advance_to(next) {
            return Err(ControlError::invalid_state(format!(
                "cannot advance deploy status of model {} from {} to {}",
                model.id, model.deploy_status, next
            )));
        }

        uow.update_deploy_status(model_id, next).await?;
        uow.commit().await?;

        info!(model_id = %model_id, status = %next, "deploy status advanced by job");
        Ok(())
    }

    /// Append a log record reported by a job callback.
    pub async fn append_log(
        &self,
        token_model: &ModelId,
        model_id: &ModelId,
        level: &str,
        message: &str,
    ) -> ControlResult<()> {
        require_token_binding(token_model, model_id)?;

        let mut uow = self.store.begin().await?;

        if uow
            .get_model(model_id, &QueryOptions::bare())
            .await?
            .is_none()
        {
            return Err(ControlError::model_not_found(model_id));
        }

        uow.append_job_log(&JobLogEntry {
            model_id: model_id.clone(),
            level: level.to_owned(),
            message: message.to_owned(),
            timestamp: chrono::Utc::now(),
        })
        .await?;
        uow.commit().await?;

        Ok(())
    }

    /// Recent job log records for a model, newest first.
    pub async fn job_logs(
        &self,
        model_id: &ModelId,
        limit: u32,
    ) -> ControlResult<Vec<JobLogEntry>> {
        self.store.list_job_logs(model_id, limit).await
    }

    /// Snapshot a deployed model into a new model record ("save deployed").
    ///
    /// Copies the source's attributes and dependency edge targets verbatim
    /// under a fresh id with a parent pointer back to the source. No
    /// scheduler interaction; the clone is independently deployable.
    pub async fn save_deployed(
        &self,
        source_id: &ModelId,
        caller: &UserId,
        new_name: &str,
    ) -> ControlResult<SavedModel> {
        let new_id = ModelId::generate();

        let mut uow = self.store.begin().await?;

        let source = uow
            .lock_model(
                source_id,
                &QueryOptions::bare().with_attributes().with_dependencies(),
            )
            .await?
            .ok_or_else(|| ControlError::model_not_found(source_id))?;

        require_permission(&mut *uow, caller, &source, Permission::Read).await?;

        if uow.model_name_taken(caller, new_name).await? {
            info!(
                base_model_id = %source.id,
                model_name = %new_name,
                "cannot save deployed model: duplicate model name"
            );
            return Err(ControlError::DuplicateName(new_name.to_owned()));
        }

        let now = chrono::Utc::now();
        let clone = ModelRecord {
            id: new_id.clone(),
            name: new_name.to_owned(),
            model_type: source.model_type.clone(),
            user_id: caller.clone(),
            parent_id: Some(source.id.clone()),
            access: crate::types::AccessLevel::Private,
            train_status: source.train_status,
            deploy_status: Status::NotStarted,
            attributes: source.attributes.clone(),
            dependencies: source.dependencies.clone(),
            owner: None,
            created_at: now,
            updated_at: now,
        };

        uow.insert_model(&clone).await?;
        uow.commit().await?;

        let update_token = self
            .job_tokens
            .issue(MODEL_CLAIM, new_id.as_str(), update_token_ttl())?;

        info!(base_model_id = %source_id, model_id = %new_id, "deployed model saved");

        Ok(SavedModel {
            model_id: new_id,
            update_token,
        })
    }

    /// Resolve a caller's permission on a model through the read path.
    pub async fn permission_for(
        &self,
        caller: &UserId,
        model_id: &ModelId,
    ) -> ControlResult<Permission> {
        let model = self
            .store
            .get_model(model_id, &QueryOptions::bare())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;
        access::permission_level(self.store.as_ref(), caller, &model).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

/// Re-check a caller's permission inside the current unit of work.
async fn require_permission(
    uow: &mut dyn UnitOfWork,
    caller: &UserId,
    model: &ModelRecord,
    required: Permission,
) -> ControlResult<()> {
    let level = access::permission_level_in(uow, caller, model).await?;
    if level < required {
        return Err(ControlError::PermissionDenied {
            user: caller.to_string(),
            model: model.id.to_string(),
            required: required.as_str(),
        });
    }
    Ok(())
}

/// Reject callbacks whose token is bound to a different model.
fn require_token_binding(token_model: &ModelId, model_id: &ModelId) -> ControlResult<()> {
    if token_model != model_id {
        return Err(ControlError::PermissionDenied {
            user: format!("job:{token_model}"),
            model: model_id.to_string(),
            required: "callback",
        });
    }
    Ok(())
}
