use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::get_config,
};
use enrichment_pipeline::{
    cache::{CacheConfig, ProviderCache},
    coordinator::{CoordinatorConfig, ProviderCoordinator},
    providers::registry_from_config,
    reconcile::ReconcileOptions,
    retry::RetryPolicy,
    EnrichmentService,
};
use ingestion_pipeline::{EventBroker, IngestConfig, IngestionOrchestrator, NoopIndexer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let storage = StorageManager::new(&config).await?;
    let events = Arc::new(EventBroker::new());

    let providers = registry_from_config(&config)?;
    info!(providers = providers.len(), "metadata providers enabled");
    let cache = Arc::new(ProviderCache::with_cleanup_task(CacheConfig::from_app_config(
        &config,
    )));
    let coordinator = Arc::new(ProviderCoordinator::new(
        providers,
        cache,
        CoordinatorConfig::from_app_config(&config),
        RetryPolicy {
            max_attempts: config.provider_retry_attempts,
            ..RetryPolicy::default()
        },
    ));
    let enrichment = Arc::new(EnrichmentService::new(
        Arc::clone(&db),
        coordinator,
        ReconcileOptions {
            preferred_language: config.preferred_language.clone(),
        },
    ));

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        Arc::clone(&db),
        storage.clone(),
        Arc::clone(&events),
        Arc::clone(&enrichment),
        Arc::new(NoopIndexer),
        IngestConfig::from_app_config(&config),
    ));

    let api_state = ApiState::new(db, config.clone(), storage, orchestrator, enrichment, events);

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
