use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use common::scopes::Scope;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthedUser};

/// `books.triggerEnrichment`
pub async fn trigger_enrichment(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Path(work_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    let outcome = state.enrichment.trigger(&work_id, &user.id).await?;
    Ok((StatusCode::OK, Json(outcome)))
}

/// `books.getEnrichmentPreview`; the body is `null` when nothing is
/// pending.
pub async fn get_enrichment_preview(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Path(work_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryRead)?;
    let preview = state.enrichment.preview(&work_id).await?;
    Ok((StatusCode::OK, Json(preview)))
}

/// `books.hasEnrichment`
pub async fn enrichment_status(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Path(work_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryRead)?;
    let status = state.enrichment.status(&work_id).await?;
    Ok((StatusCode::OK, Json(status)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplyParams {
    #[serde(default)]
    pub selected_fields: Option<Vec<String>>,
}

/// `books.applyEnrichment`
pub async fn apply_enrichment(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Path(enrichment_id): Path<String>,
    params: Option<Json<ApplyParams>>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    let params = params.map(|Json(params)| params).unwrap_or_default();
    let applied = state
        .enrichment
        .apply(&enrichment_id, params.selected_fields.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(json!({ "applied_fields": applied }))))
}

/// `books.dismissEnrichment`
pub async fn dismiss_enrichment(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Path(enrichment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    let ok = state.enrichment.dismiss(&enrichment_id).await?;
    Ok((StatusCode::OK, Json(json!({ "ok": ok }))))
}
