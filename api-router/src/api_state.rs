use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use enrichment_pipeline::EnrichmentService;
use ingestion_pipeline::{EventBroker, IngestionOrchestrator};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub enrichment: Arc<EnrichmentService>,
    pub events: Arc<EventBroker>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
        orchestrator: Arc<IngestionOrchestrator>,
        enrichment: Arc<EnrichmentService>,
        events: Arc<EventBroker>,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            orchestrator,
            enrichment,
            events,
        }
    }
}
