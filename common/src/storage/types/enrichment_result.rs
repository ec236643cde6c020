use uuid::Uuid;

use crate::{
    error::AppError,
    metadata::{FieldImprovement, Preview},
    storage::db::SurrealDbClient,
    stored_object,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Applied,
    Dismissed,
}

stored_object!(EnrichmentResult, "enrichment_result", {
    work_id: String,
    user_id: String,
    preview: Preview,
    improvements: Vec<FieldImprovement>,
    sources: Vec<String>,
    status: EnrichmentStatus,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    applied_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    dismissed_at: Option<DateTime<Utc>>
});

impl EnrichmentResult {
    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<EnrichmentResult, AppError> {
        db.get_item::<EnrichmentResult>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("enrichment {id}")))
    }

    pub async fn find_pending_by_work(
        work_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<EnrichmentResult>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM enrichment_result WHERE work_id = $work_id AND status = 'pending' LIMIT 1",
            )
            .bind(("work_id", work_id.to_string()))
            .await?;
        let rows: Vec<EnrichmentResult> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Creates or replaces the single pending enrichment for a work.
    ///
    /// Runs as one transaction so two concurrent triggers cannot leave two
    /// pending rows behind; a fresh trigger overwrites the previous preview.
    pub async fn upsert_pending(
        work_id: &str,
        user_id: &str,
        preview: &Preview,
        improvements: &[FieldImprovement],
        sources: &[String],
        db: &SurrealDbClient,
    ) -> Result<EnrichmentResult, AppError> {
        const UPSERT: &str = r"
            BEGIN TRANSACTION;
            LET $existing = (SELECT VALUE id FROM enrichment_result
                WHERE work_id = $work_id AND status = 'pending' LIMIT 1);
            IF array::len($existing) > 0 {
                UPDATE $existing[0] SET
                    user_id = $user_id,
                    preview = $preview,
                    improvements = $improvements,
                    sources = $sources,
                    updated_at = time::now();
            } ELSE {
                CREATE type::thing('enrichment_result', $new_id) CONTENT {
                    work_id: $work_id,
                    user_id: $user_id,
                    preview: $preview,
                    improvements: $improvements,
                    sources: $sources,
                    status: 'pending',
                    applied_at: NONE,
                    dismissed_at: NONE,
                    created_at: time::now(),
                    updated_at: time::now()
                };
            };
            COMMIT TRANSACTION;
        ";

        db.query(UPSERT)
            .bind(("work_id", work_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("preview", serde_json::to_value(preview).map_err(to_internal)?))
            .bind((
                "improvements",
                serde_json::to_value(improvements).map_err(to_internal)?,
            ))
            .bind(("sources", sources.to_vec()))
            .bind(("new_id", Uuid::new_v4().to_string()))
            .await?;

        Self::find_pending_by_work(work_id, db)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(format!("pending enrichment for {work_id} vanished"))
            })
    }

    /// Transitions a pending enrichment to applied. Returns `None` when the
    /// row is no longer pending, making a repeated apply a no-op.
    pub async fn mark_applied(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<EnrichmentResult>, AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('enrichment_result', $id)
                    SET status = 'applied', applied_at = time::now(), updated_at = time::now()
                    WHERE status = 'pending'
                    RETURN AFTER",
            )
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<EnrichmentResult> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Transitions a pending enrichment to dismissed; same idempotency
    /// contract as [`Self::mark_applied`].
    pub async fn mark_dismissed(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<EnrichmentResult>, AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('enrichment_result', $id)
                    SET status = 'dismissed', dismissed_at = time::now(), updated_at = time::now()
                    WHERE status = 'pending'
                    RETURN AFTER",
            )
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<EnrichmentResult> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}

fn to_internal(err: serde_json::Error) -> AppError {
    AppError::InternalError(format!("enrichment payload serialization: {err}"))
}
