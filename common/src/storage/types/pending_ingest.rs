use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Why an ingest paused for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateReason {
    DuplicateWork,
    DuplicateEdition,
}

stored_object!(PendingIngest, "pending_ingest", {
    user_id: String,
    upload_id: String,
    storage_key: String,
    file_name: String,
    media_type: String,
    checksum: String,
    size: u64,
    /// Snapshot of the extracted embedded metadata, so confirmation does
    /// not re-read or re-parse the upload.
    embedded: serde_json::Value,
    candidate_work_ids: Vec<String>,
    reason: DuplicateReason
});

impl PendingIngest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: &str,
        upload_id: &str,
        storage_key: &str,
        file_name: &str,
        media_type: &str,
        checksum: &str,
        size: u64,
        embedded: serde_json::Value,
        candidate_work_ids: Vec<String>,
        reason: DuplicateReason,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            upload_id: upload_id.to_string(),
            storage_key: storage_key.to_string(),
            file_name: file_name.to_string(),
            media_type: media_type.to_string(),
            checksum: checksum.to_string(),
            size,
            embedded,
            candidate_work_ids,
            reason,
        }
    }

    pub async fn get_for_user(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<PendingIngest, AppError> {
        let pending: Option<PendingIngest> = db.get_item(id).await?;
        match pending {
            Some(pending) if pending.user_id == user_id => Ok(pending),
            Some(_) => Err(AppError::Auth(format!(
                "pending ingest {id} belongs to another user"
            ))),
            None => Err(AppError::NotFound(format!("pending ingest {id}"))),
        }
    }

    /// Removes the row; a pending ingest is resolved exactly once, so a
    /// second resolution observes `None` here.
    pub async fn resolve(id: &str, db: &SurrealDbClient) -> Result<Option<PendingIngest>, AppError> {
        Ok(db.delete_item::<PendingIngest>(id).await?)
    }
}
