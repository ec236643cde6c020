use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use common::scopes::Scope;
use ingestion_pipeline::{ConfirmAction, PresignOutcome};

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthedUser};

#[derive(Debug, Deserialize)]
pub struct UploadUrlParams {
    pub upload_id: String,
    /// Base64-encoded SHA-256 of the file contents.
    pub checksum: String,
    pub media_type: Option<String>,
    pub size: u64,
    pub filename: String,
}

/// `books.getUploadUrl`
pub async fn get_upload_url(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Json(params): Json<UploadUrlParams>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    debug!(
        upload_id = %params.upload_id,
        declared_media_type = params.media_type.as_deref().unwrap_or("<none>"),
        "upload URL requested"
    );
    let outcome = state
        .orchestrator
        .presign_upload(
            &user.id,
            &params.upload_id,
            &params.checksum,
            params.size,
            &params.filename,
        )
        .await?;
    let body = match outcome {
        PresignOutcome::Duplicate { existing_asset_id } => json!({
            "duplicate": true,
            "existing_asset_id": existing_asset_id,
        }),
        PresignOutcome::Upload {
            upload_url,
            storage_key,
        } => json!({
            "duplicate": false,
            "upload_url": upload_url,
            "storage_key": storage_key,
        }),
    };
    Ok((StatusCode::OK, Json(body)))
}

/// Upload target backing the presigned URLs of the local and memory
/// storage backends; S3 deployments upload straight to the bucket.
pub async fn upload_bytes(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Path(storage_key): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    if body.is_empty() {
        return Err(ApiError::ValidationError("empty upload body".into()));
    }
    state
        .storage
        .put(&storage_key, body)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "stored" }))))
}

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    pub upload_id: String,
    pub storage_key: String,
    pub filename: String,
}

/// `books.ingest`
pub async fn ingest(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Json(params): Json<IngestParams>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    let result = state
        .orchestrator
        .ingest(&user.id, &params.upload_id, &params.storage_key, &params.filename)
        .await?;
    Ok((StatusCode::OK, Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    pub upload_id: String,
    pub pending_id: String,
    pub action: ConfirmAction,
}

/// `books.confirmDuplicate`
pub async fn confirm_duplicate(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
    Json(params): Json<ConfirmParams>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Scope::LibraryWrite)?;
    let result = state
        .orchestrator
        .confirm_ingest(&user.id, &params.upload_id, &params.pending_id, params.action)
        .await?;
    Ok((StatusCode::OK, Json(result)))
}
