//! Shared fixtures for integration tests.

// Each integration binary compiles its own copy of this module and uses a
// different subset of it.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use orrery_control::blobs::MemoryConfigStore;
use orrery_control::config::JobsConfig;
use orrery_control::license::{Negotiator, StaticLicenseAuthority};
use orrery_control::scheduler::MockScheduler;
use orrery_control::store::{MemoryStore, ModelStore};
use orrery_control::token::{HsTokenSigner, TokenSigner, MODEL_CLAIM, USER_CLAIM};
use orrery_control::types::{AccessLevel, ModelId, ModelRecord, Status, UserId};
use orrery_control::{AppState, JobScheduler, Orchestrator};

pub const USER_SECRET: &str = "integration-user-secret";
pub const JOB_SECRET: &str = "integration-job-secret";

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub scheduler: Arc<MockScheduler>,
    pub state: AppState,
}

/// Build a fully wired control plane over in-memory collaborators.
pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

/// Build a harness whose orchestrator runs over `store_for_orchestrator`,
/// while fixtures are still seeded through the returned memory store.
pub fn harness_over(
    memory: Arc<MemoryStore>,
    store_for_orchestrator: Arc<dyn ModelStore>,
) -> Harness {
    let scheduler = Arc::new(MockScheduler::new());
    let job_tokens = Arc::new(HsTokenSigner::new(JOB_SECRET));

    let negotiator = Negotiator::new(
        Arc::new(StaticLicenseAuthority::new("key", 1_000_000)),
        Arc::clone(&scheduler) as Arc<dyn JobScheduler>,
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store_for_orchestrator),
        Arc::clone(&scheduler) as Arc<dyn JobScheduler>,
        Arc::new(MemoryConfigStore::new()),
        negotiator,
        Arc::clone(&job_tokens) as Arc<dyn TokenSigner>,
        JobsConfig::default(),
    ));

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        store: store_for_orchestrator,
        user_tokens: Arc::new(HsTokenSigner::new(USER_SECRET)),
        job_tokens,
    };

    Harness {
        orchestrator,
        store: memory,
        scheduler,
        state,
    }
}

fn harness_with_store(memory: Arc<MemoryStore>) -> Harness {
    let store: Arc<dyn ModelStore> = Arc::clone(&memory) as Arc<dyn ModelStore>;
    harness_over(memory, store)
}

/// Seed a trained, undeployed model.
pub async fn seed_model(store: &MemoryStore, id: &str, owner: &str, deps: &[&str]) {
    seed_model_with(store, id, owner, deps, Status::Complete, AccessLevel::Private).await;
}

pub async fn seed_model_with(
    store: &MemoryStore,
    id: &str,
    owner: &str,
    deps: &[&str],
    train_status: Status,
    access: AccessLevel,
) {
    let now = chrono::Utc::now();
    store
        .insert_model(&ModelRecord {
            id: ModelId::new(id),
            name: id.to_owned(),
            model_type: "ndb".to_owned(),
            user_id: UserId::new(owner),
            parent_id: None,
            access,
            train_status,
            deploy_status: Status::NotStarted,
            attributes: BTreeMap::from([("checkpoint".to_owned(), "v5".to_owned())]),
            dependencies: deps.iter().map(|d| ModelId::new(*d)).collect(),
            owner: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("seeding model failed");
}

pub fn user_token(user: &str) -> String {
    HsTokenSigner::new(USER_SECRET)
        .issue(USER_CLAIM, user, chrono::Duration::hours(1))
        .expect("issuing user token failed")
}

pub fn job_token(model: &str) -> String {
    HsTokenSigner::new(JOB_SECRET)
        .issue(MODEL_CLAIM, model, chrono::Duration::hours(1))
        .expect("issuing job token failed")
}
