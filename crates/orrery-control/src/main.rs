//! Orrery control service binary.
//!
//! Runs the control plane for orchestrating model deployments.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use orrery_control::blobs::FsConfigStore;
use orrery_control::license::{
    HttpLicenseAuthority, LicenseAuthority, Negotiator, StaticLicenseAuthority,
};
use orrery_control::scheduler::JobScheduler;
use orrery_control::store::ModelStore;
use orrery_control::token::TokenSigner;
use orrery_control::{
    AppState, ControlConfig, HsTokenSigner, HttpScheduler, Orchestrator, PostgresStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("orrery_control=info".parse()?),
        )
        .init();

    info!("Orrery control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        database = %config.database.url,
        scheduler = %config.scheduler.url,
        "configuration loaded"
    );

    let store: Arc<dyn ModelStore> = Arc::new(PostgresStore::new(&config.database).await?);
    let scheduler: Arc<dyn JobScheduler> = Arc::new(HttpScheduler::new(&config.scheduler)?);
    let configs = Arc::new(FsConfigStore::new(&config.storage.root));

    let authority: Arc<dyn LicenseAuthority> = match &config.license.authority_url {
        Some(url) => Arc::new(HttpLicenseAuthority::new(url)?),
        None => Arc::new(StaticLicenseAuthority::new(
            config.license.key.clone(),
            config.license.cpu_limit,
        )),
    };
    let negotiator = Negotiator::new(authority, Arc::clone(&scheduler));

    let job_tokens: Arc<dyn TokenSigner> = Arc::new(HsTokenSigner::new(&config.auth.job_secret));
    let user_tokens: Arc<dyn TokenSigner> = Arc::new(HsTokenSigner::new(&config.auth.user_secret));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        configs,
        negotiator,
        Arc::clone(&job_tokens),
        config.jobs.clone(),
    ));

    let state = AppState {
        orchestrator,
        store,
        user_tokens,
        job_tokens,
    };

    let app = orrery_control::router(state);
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;

    info!(listen_addr = %config.server.listen_addr, "serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Orrery control service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
