use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    books::{confirm_duplicate, get_upload_url, ingest, upload_bytes},
    enrichment::{
        apply_enrichment, dismiss_enrichment, enrichment_status, get_enrichment_preview,
        trigger_enrichment,
    },
    events::import_events,
    liveness::live,
    readiness::ready,
};

pub mod api_state;
pub mod error;
pub mod middleware_api_auth;
mod routes;

/// Uploads stream through the local backend's PUT target; anything larger
/// belongs on S3.
const UPLOAD_BODY_LIMIT: usize = 256 * 1024 * 1024;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Protected API endpoints (require an API key)
    let protected = Router::new()
        .route("/books/upload-url", post(get_upload_url))
        .route(
            "/books/upload/{*storage_key}",
            put(upload_bytes).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/books/ingest", post(ingest))
        .route("/books/confirm", post(confirm_duplicate))
        .route(
            "/books/works/{work_id}/enrichment",
            post(trigger_enrichment).get(get_enrichment_preview),
        )
        .route(
            "/books/works/{work_id}/enrichment/status",
            get(enrichment_status),
        )
        .route("/books/enrichments/{enrichment_id}/apply", post(apply_enrichment))
        .route(
            "/books/enrichments/{enrichment_id}/dismiss",
            post(dismiss_enrichment),
        )
        .route("/events", get(import_events))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
