use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use common::error::AppError;
use common::metadata::FieldImprovement;
use common::storage::db::SurrealDbClient;
use common::storage::types::contributor::{Contributor, Relator};
use common::storage::types::enrichment_result::{EnrichmentResult, EnrichmentStatus};
use common::storage::types::work::Work;

use crate::coordinator::ProviderCoordinator;
use crate::provider::{MetadataProvider, ProviderField};
use crate::query::ProviderQuery;
use crate::reconcile::{self, authors, ReconcileOptions, ReliabilitySource};
use crate::{improvements, reconcile::isbn};

/// Result of `books.triggerEnrichment`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerOutcome {
    pub success: bool,
    pub improvement_count: usize,
    pub has_conflicts: bool,
    pub sources: Vec<String>,
}

/// Result of `books.hasEnrichment`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentSummary {
    pub has_enrichment: bool,
    pub id: Option<String>,
    pub improvement_count: Option<usize>,
    pub sources: Option<Vec<String>>,
}

/// Reliability lookup backed by the live provider registry.
struct ProviderReliability {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl ReliabilitySource for ProviderReliability {
    fn score(&self, source: &str, field: ProviderField) -> f64 {
        self.providers
            .iter()
            .find(|provider| provider.name() == source)
            .map_or(0.5, |provider| provider.reliability(field))
    }
}

/// Drives enrichment: provider fan-out, reconciliation, the pending row
/// lifecycle and applying accepted improvements.
pub struct EnrichmentService {
    db: Arc<SurrealDbClient>,
    coordinator: Arc<ProviderCoordinator>,
    options: ReconcileOptions,
}

impl EnrichmentService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        coordinator: Arc<ProviderCoordinator>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            db,
            coordinator,
            options,
        }
    }

    /// The query a work's current metadata supports.
    pub fn query_for_work(work: &Work, contributors: &[Contributor]) -> ProviderQuery {
        ProviderQuery {
            title: work.title.clone(),
            authors: contributors
                .iter()
                .filter(|contributor| contributor.roles.contains(&Relator::Aut))
                .map(|contributor| contributor.name.clone())
                .collect(),
            isbn: work.isbn_13.clone().or_else(|| work.isbn_10.clone()),
            language: work.language.clone(),
            ..ProviderQuery::default()
        }
    }

    #[instrument(skip(self), fields(work_id = %work_id, user_id = %user_id))]
    pub async fn trigger(&self, work_id: &str, user_id: &str) -> Result<TriggerOutcome, AppError> {
        let work = Work::get_by_id(work_id, &self.db).await?;
        let contributors = Contributor::list_for_work(work_id, &self.db).await?;
        let mut query = Self::query_for_work(&work, &contributors);
        if let Some(preferred) = &self.options.preferred_language {
            query.language = Some(preferred.clone());
        }
        if query.is_empty() {
            return Err(AppError::Validation(format!(
                "work {work_id} has no searchable metadata"
            )));
        }

        let result = self.coordinator.search(&query).await?;
        if result.successful == 0 {
            return Err(AppError::Processing(
                "every metadata provider failed".to_string(),
            ));
        }
        if result.aggregated_records.is_empty() {
            debug!(work_id, "no provider records; skipping preview");
            return Ok(TriggerOutcome {
                success: false,
                improvement_count: 0,
                has_conflicts: false,
                sources: Vec::new(),
            });
        }

        let reliability = ProviderReliability {
            providers: self.coordinator.providers().to_vec(),
        };
        let preview = reconcile::reconcile(&result.aggregated_records, &self.options, &reliability);
        let improvements = improvements::compute(&preview, &work, contributors.len());
        let sources = preview.summary.sources.clone();
        let has_conflicts = !preview.summary.conflicted_fields.is_empty();

        let row = EnrichmentResult::upsert_pending(
            work_id,
            user_id,
            &preview,
            &improvements,
            &sources,
            &self.db,
        )
        .await?;
        info!(
            work_id,
            enrichment_id = %row.id,
            improvements = improvements.len(),
            confidence = preview.confidence,
            "enrichment preview stored"
        );

        Ok(TriggerOutcome {
            success: true,
            improvement_count: improvements.len(),
            has_conflicts,
            sources,
        })
    }

    pub async fn preview(&self, work_id: &str) -> Result<Option<EnrichmentResult>, AppError> {
        EnrichmentResult::find_pending_by_work(work_id, &self.db).await
    }

    pub async fn status(&self, work_id: &str) -> Result<EnrichmentSummary, AppError> {
        Ok(match self.preview(work_id).await? {
            Some(row) => EnrichmentSummary {
                has_enrichment: true,
                id: Some(row.id),
                improvement_count: Some(row.improvements.len()),
                sources: Some(row.sources),
            },
            None => EnrichmentSummary::default(),
        })
    }

    /// Applies a pending enrichment to its work. A second apply observes a
    /// non-pending row and returns no applied fields.
    #[instrument(skip(self, selected_fields), fields(enrichment_id = %enrichment_id))]
    pub async fn apply(
        &self,
        enrichment_id: &str,
        selected_fields: Option<&[String]>,
    ) -> Result<Vec<String>, AppError> {
        let row = EnrichmentResult::get_by_id(enrichment_id, &self.db).await?;
        if row.status != EnrichmentStatus::Pending {
            return Ok(Vec::new());
        }
        let Some(row) = EnrichmentResult::mark_applied(enrichment_id, &self.db).await? else {
            // Raced with another apply or a dismissal.
            return Ok(Vec::new());
        };

        let selected: Vec<&FieldImprovement> = row
            .improvements
            .iter()
            .filter(|improvement| {
                selected_fields.is_none_or(|fields| fields.contains(&improvement.field))
            })
            .collect();

        let applied = self.write_improvements(&row.work_id, &selected).await?;
        info!(
            work_id = %row.work_id,
            applied = applied.len(),
            "enrichment applied"
        );
        Ok(applied)
    }

    pub async fn dismiss(&self, enrichment_id: &str) -> Result<bool, AppError> {
        // Surface unknown ids before the idempotent transition.
        let _ = EnrichmentResult::get_by_id(enrichment_id, &self.db).await?;
        let dismissed = EnrichmentResult::mark_dismissed(enrichment_id, &self.db).await?;
        Ok(dismissed.is_some())
    }

    /// Writes selected improvements onto the work row (and replaces the
    /// work's contributors for an authors improvement) in one transaction.
    /// Fields without a storage column (subjects, series, cover) are
    /// preview-only and never count as applied.
    async fn write_improvements(
        &self,
        work_id: &str,
        improvements: &[&FieldImprovement],
    ) -> Result<Vec<String>, AppError> {
        let mut set_clauses: Vec<String> = Vec::new();
        let mut applied: Vec<String> = Vec::new();

        let mut title: Option<String> = None;
        let mut description: Option<String> = None;
        let mut publication_date: Option<String> = None;
        let mut language: Option<String> = None;
        let mut pages: Option<u32> = None;
        let mut isbn_value: Option<String> = None;
        let mut author_rows: Vec<Value> = Vec::new();

        for improvement in improvements {
            match improvement.field.as_str() {
                "title" => {
                    if let Some(value) = improvement.value.as_str() {
                        title = Some(value.to_string());
                        set_clauses.push("title = $title, title_key = $title_key".into());
                        applied.push("title".into());
                    }
                }
                "description" => {
                    if let Some(value) = improvement.value.as_str() {
                        description = Some(value.to_string());
                        set_clauses.push("synopsis = $description".into());
                        applied.push("description".into());
                    }
                }
                "publication_date" => {
                    if let Some(value) = improvement.value.as_str() {
                        publication_date = Some(value.to_string());
                        set_clauses.push("published_at = $publication_date".into());
                        applied.push("publication_date".into());
                    }
                }
                "language" => {
                    if let Some(value) = improvement.value.as_str() {
                        language = Some(value.to_string());
                        set_clauses.push("language = $language".into());
                        applied.push("language".into());
                    }
                }
                "pages" => {
                    if let Some(value) = improvement.value.as_u64() {
                        pages = u32::try_from(value).ok();
                        if pages.is_some() {
                            set_clauses.push("pages = $pages".into());
                            applied.push("pages".into());
                        }
                    }
                }
                "isbn" => {
                    if let Some(value) = improvement.value.as_str() {
                        if isbn::is_valid_isbn13(value) {
                            isbn_value = Some(value.to_string());
                            set_clauses.push("isbn_13 = $isbn".into());
                            applied.push("isbn".into());
                        }
                    }
                }
                "authors" => {
                    if let Some(values) = improvement.value.as_array() {
                        for author in values.iter().filter_map(Value::as_str) {
                            let sorting_key = authors::PersonName::parse(author)
                                .map_or_else(|| author.to_string(), |name| name.sorting_key());
                            author_rows.push(serde_json::json!({
                                "name": author,
                                "sorting_key": sorting_key,
                            }));
                        }
                        if !author_rows.is_empty() {
                            applied.push("authors".into());
                        }
                    }
                }
                _ => {}
            }
        }

        if set_clauses.is_empty() && author_rows.is_empty() {
            return Ok(applied);
        }

        let update_work = if set_clauses.is_empty() {
            String::new()
        } else {
            format!(
                "UPDATE type::thing('work', $work_id) SET {}, updated_at = time::now();",
                set_clauses.join(", ")
            )
        };
        let query = format!(
            r"
            BEGIN TRANSACTION;
            {update_work}
            IF array::len($authors) > 0 {{
                DELETE contributor WHERE work_id = $work_id;
                FOR $author IN $authors {{
                    CREATE contributor CONTENT {{
                        work_id: $work_id,
                        name: $author.name,
                        sorting_key: $author.sorting_key,
                        roles: ['aut'],
                        created_at: time::now(),
                        updated_at: time::now()
                    }};
                }};
            }};
            COMMIT TRANSACTION;
            "
        );

        let title_key = title.as_deref().map(Work::title_key_of);
        self.db
            .query(query)
            .bind(("work_id", work_id.to_string()))
            .bind(("title", title))
            .bind(("title_key", title_key))
            .bind(("description", description))
            .bind(("publication_date", publication_date))
            .bind(("language", language))
            .bind(("pages", pages))
            .bind(("isbn", isbn_value))
            .bind(("authors", author_rows))
            .await?;

        Ok(applied)
    }
}
