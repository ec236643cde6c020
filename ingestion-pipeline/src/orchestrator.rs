use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::store::StorageManager;
use common::storage::types::asset::Asset;
use common::storage::types::contributor::Contributor;
use common::storage::types::edition::Edition;
use common::storage::types::pending_ingest::{DuplicateReason, PendingIngest};
use common::storage::types::work::Work;
use common::utils::config::{AppConfig, DuplicatePolicy};
use enrichment_pipeline::reconcile::{authors, dates, isbn};
use enrichment_pipeline::EnrichmentService;
use state_machines::core::GuardError;

use crate::duplicates::{self, DuplicateCheck};
use crate::events::{EventBroker, ImportEvent};
use crate::extract::{self, EmbeddedMetadata, FileFormat};
use crate::state::{ready, IngestMachine, Parsed, Resolved};

const DUPLICATE_FILE_REASON: &str = "Exact duplicate file already exists in library";

/// Result of `books.getUploadUrl`. The wire form is built by the API
/// layer (`duplicate` travels as a boolean).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresignOutcome {
    Duplicate { existing_asset_id: String },
    Upload {
        upload_url: String,
        storage_key: String,
    },
}

/// Tagged outcome of one ingest run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum IngestResult {
    Created {
        work_id: String,
        edition_id: String,
        asset_id: String,
    },
    AddedEdition {
        work_id: String,
        edition_id: String,
        asset_id: String,
    },
    Skipped {
        #[serde(skip_serializing_if = "Option::is_none")]
        asset_id: Option<String>,
        reason: String,
    },
    NeedsConfirmation {
        pending_id: String,
        reason: DuplicateReason,
    },
}

/// User choice when resolving a pending ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmAction {
    Skip,
    CreateWork,
    CreateEdition,
}

/// Callback into the (out-of-scope) content indexing machinery.
#[async_trait]
pub trait ContentIndexer: Send + Sync {
    async fn index_asset(&self, asset_id: &str) -> Result<(), AppError>;
}

pub struct NoopIndexer;

#[async_trait]
impl ContentIndexer for NoopIndexer {
    async fn index_asset(&self, _asset_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub presign_expiry: Duration,
    pub on_duplicate_edition: DuplicatePolicy,
    /// Fire-and-forget enrichment after a successful ingest.
    pub enrich_after_ingest: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            presign_expiry: Duration::from_secs(3600),
            on_duplicate_edition: DuplicatePolicy::Prompt,
            enrich_after_ingest: true,
        }
    }
}

impl IngestConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            presign_expiry: Duration::from_secs(cfg.presign_expiry_secs),
            on_duplicate_edition: cfg.on_duplicate_edition,
            enrich_after_ingest: true,
        }
    }
}

/// Coordinates the end-to-end flow for one uploaded file.
pub struct IngestionOrchestrator {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    events: Arc<EventBroker>,
    enrichment: Arc<EnrichmentService>,
    indexer: Arc<dyn ContentIndexer>,
    config: IngestConfig,
}

impl IngestionOrchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        events: Arc<EventBroker>,
        enrichment: Arc<EnrichmentService>,
        indexer: Arc<dyn ContentIndexer>,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            storage,
            events,
            enrichment,
            indexer,
            config,
        }
    }

    /// `books.getUploadUrl`: checksum dedup, then a presigned PUT URL
    /// under a fresh sanitised storage key.
    #[instrument(skip(self, checksum_base64), fields(upload_id = %upload_id, user_id = %user_id))]
    pub async fn presign_upload(
        &self,
        user_id: &str,
        upload_id: &str,
        checksum_base64: &str,
        size: u64,
        file_name: &str,
    ) -> Result<PresignOutcome, AppError> {
        if size == 0 {
            return Err(AppError::Validation("upload size must be positive".into()));
        }
        let checksum = Asset::decode_checksum(checksum_base64)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if let Some(existing) = Asset::get_by_checksum(&checksum, &self.db).await? {
            info!(asset_id = %existing.id, "upload is an exact duplicate");
            self.events.emit(
                user_id,
                ImportEvent::Skipped {
                    upload_id: upload_id.to_string(),
                    reason: DUPLICATE_FILE_REASON.to_string(),
                },
            );
            return Ok(PresignOutcome::Duplicate {
                existing_asset_id: existing.id,
            });
        }

        let storage_key = Asset::storage_key_for(file_name);
        let presigned = self
            .storage
            .presign_put(&storage_key, self.config.presign_expiry)
            .await?;
        Ok(PresignOutcome::Upload {
            upload_url: presigned.url,
            storage_key,
        })
    }

    /// `books.ingest`: pulls the uploaded bytes, extracts metadata, runs
    /// the duplicate policy and persists inside one transaction.
    #[instrument(skip(self), fields(upload_id = %upload_id, user_id = %user_id))]
    pub async fn ingest(
        &self,
        user_id: &str,
        upload_id: &str,
        storage_key: &str,
        file_name: &str,
    ) -> Result<IngestResult, AppError> {
        match self
            .run_ingest(user_id, upload_id, storage_key, file_name)
            .await
        {
            Ok(result) => {
                self.announce(user_id, upload_id, &result);
                self.spawn_background(user_id, upload_id, &result);
                Ok(result)
            }
            Err(err) => {
                warn!(error = %err, "ingest failed");
                self.events.emit(
                    user_id,
                    ImportEvent::Failed {
                        upload_id: upload_id.to_string(),
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    async fn run_ingest(
        &self,
        user_id: &str,
        upload_id: &str,
        storage_key: &str,
        file_name: &str,
    ) -> Result<IngestResult, AppError> {
        let machine = ready();
        self.progress(user_id, upload_id, "fetching");

        let bytes = self.storage.get(storage_key).await?;
        let machine = machine
            .fetch()
            .map_err(|(_, guard)| map_guard_error("fetch", &guard))?;

        let checksum = Asset::checksum_hex(&bytes);
        if let Some(existing) = Asset::get_by_checksum(&checksum, &self.db).await? {
            // Retry or a lost race; the stored asset wins and the fresh
            // upload becomes an orphan for garbage collection.
            return Ok(IngestResult::Skipped {
                asset_id: Some(existing.id),
                reason: DUPLICATE_FILE_REASON.to_string(),
            });
        }

        self.progress(user_id, upload_id, "parsing");
        let (format, embedded) = extract::extract(&bytes, file_name)?;
        let machine = machine
            .parse()
            .map_err(|(_, guard)| map_guard_error("parse", &guard))?;

        self.store_cover_sidecar(storage_key, &embedded).await;

        self.progress(user_id, upload_id, "resolving");
        let check = duplicates::check(&embedded, &self.db).await?;
        self.resolve(
            machine,
            user_id,
            upload_id,
            storage_key,
            file_name,
            format,
            &checksum,
            bytes.len() as u64,
            embedded,
            check,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve(
        &self,
        machine: IngestMachine<(), Parsed>,
        user_id: &str,
        upload_id: &str,
        storage_key: &str,
        file_name: &str,
        format: FileFormat,
        checksum: &str,
        size: u64,
        embedded: EmbeddedMetadata,
        check: DuplicateCheck,
    ) -> Result<IngestResult, AppError> {
        let machine = machine
            .resolve()
            .map_err(|(_, guard)| map_guard_error("resolve", &guard))?;

        match check {
            DuplicateCheck::None => {
                self.progress(user_id, upload_id, "persisting");
                self.persist(
                    machine, user_id, upload_id, storage_key, file_name, format, checksum, size,
                    &embedded, None,
                )
                .await
            }
            DuplicateCheck::Edition { work_ids } => match self.config.on_duplicate_edition {
                DuplicatePolicy::Prompt => {
                    self.park_for_confirmation(
                        user_id,
                        upload_id,
                        storage_key,
                        file_name,
                        format,
                        checksum,
                        size,
                        &embedded,
                        work_ids,
                        DuplicateReason::DuplicateEdition,
                    )
                    .await
                }
                DuplicatePolicy::Skip => Ok(IngestResult::Skipped {
                    asset_id: None,
                    reason: "An edition with this ISBN already exists".to_string(),
                }),
                DuplicatePolicy::CreateEdition => {
                    self.progress(user_id, upload_id, "persisting");
                    self.persist(
                        machine, user_id, upload_id, storage_key, file_name, format, checksum,
                        size, &embedded, work_ids.first().map(String::as_str),
                    )
                    .await
                }
            },
            DuplicateCheck::Work { work_ids } => {
                self.park_for_confirmation(
                    user_id,
                    upload_id,
                    storage_key,
                    file_name,
                    format,
                    checksum,
                    size,
                    &embedded,
                    work_ids,
                    DuplicateReason::DuplicateWork,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn park_for_confirmation(
        &self,
        user_id: &str,
        upload_id: &str,
        storage_key: &str,
        file_name: &str,
        format: FileFormat,
        checksum: &str,
        size: u64,
        embedded: &EmbeddedMetadata,
        candidate_work_ids: Vec<String>,
        reason: DuplicateReason,
    ) -> Result<IngestResult, AppError> {
        let snapshot = serde_json::to_value(embedded)
            .map_err(|e| AppError::InternalError(format!("metadata snapshot: {e}")))?;
        let pending = PendingIngest::new(
            user_id,
            upload_id,
            storage_key,
            file_name,
            format.media_type(),
            checksum,
            size,
            snapshot,
            candidate_work_ids,
            reason,
        );
        let pending_id = pending.id.clone();
        self.db.store_item(pending).await?;
        info!(pending_id = %pending_id, reason = ?reason, "ingest parked for confirmation");
        Ok(IngestResult::NeedsConfirmation { pending_id, reason })
    }

    /// `books.confirmDuplicate`: resolves a parked ingest exactly once.
    #[instrument(skip(self), fields(pending_id = %pending_id, user_id = %user_id))]
    pub async fn confirm_ingest(
        &self,
        user_id: &str,
        upload_id: &str,
        pending_id: &str,
        action: ConfirmAction,
    ) -> Result<IngestResult, AppError> {
        let pending = PendingIngest::get_for_user(pending_id, user_id, &self.db).await?;
        if PendingIngest::resolve(pending_id, &self.db).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "pending ingest {pending_id} was already resolved"
            )));
        }

        let embedded: EmbeddedMetadata = serde_json::from_value(pending.embedded.clone())
            .map_err(|e| AppError::InternalError(format!("metadata snapshot decode: {e}")))?;

        let result = match action {
            ConfirmAction::Skip => Ok(IngestResult::Skipped {
                asset_id: None,
                reason: "Duplicate ingest skipped on confirmation".to_string(),
            }),
            ConfirmAction::CreateWork => {
                let machine = confirmed_machine()?;
                self.persist_from_pending(machine, user_id, &pending, &embedded, None)
                    .await
            }
            ConfirmAction::CreateEdition => {
                let Some(work_id) = pending.candidate_work_ids.first() else {
                    return Err(AppError::NotFound(
                        "pending ingest has no candidate work to attach to".into(),
                    ));
                };
                let machine = confirmed_machine()?;
                self.persist_from_pending(machine, user_id, &pending, &embedded, Some(work_id))
                    .await
            }
        }?;

        self.announce(user_id, upload_id, &result);
        self.spawn_background(user_id, upload_id, &result);
        Ok(result)
    }

    async fn persist_from_pending(
        &self,
        machine: IngestMachine<(), Resolved>,
        user_id: &str,
        pending: &PendingIngest,
        embedded: &EmbeddedMetadata,
        attach_to: Option<&str>,
    ) -> Result<IngestResult, AppError> {
        self.persist_with_media_type(
            machine,
            user_id,
            &pending.storage_key,
            &pending.file_name,
            &pending.media_type,
            &pending.checksum,
            pending.size,
            embedded,
            attach_to,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        machine: IngestMachine<(), Resolved>,
        user_id: &str,
        _upload_id: &str,
        storage_key: &str,
        file_name: &str,
        format: FileFormat,
        checksum: &str,
        size: u64,
        embedded: &EmbeddedMetadata,
        attach_to: Option<&str>,
    ) -> Result<IngestResult, AppError> {
        self.persist_with_media_type(
            machine,
            user_id,
            storage_key,
            file_name,
            format.media_type(),
            checksum,
            size,
            embedded,
            attach_to,
        )
        .await
    }

    /// All row writes for one ingest happen in this single transaction.
    #[allow(clippy::too_many_arguments)]
    async fn persist_with_media_type(
        &self,
        machine: IngestMachine<(), Resolved>,
        user_id: &str,
        storage_key: &str,
        file_name: &str,
        media_type: &str,
        checksum: &str,
        size: u64,
        embedded: &EmbeddedMetadata,
        attach_to: Option<&str>,
    ) -> Result<IngestResult, AppError> {
        let asset = Asset::new(
            checksum.to_string(),
            media_type.to_string(),
            size,
            storage_key.to_string(),
            file_name.to_string(),
        )?;
        let edition_title = embedded
            .title
            .clone()
            .or_else(|| EmbeddedMetadata::from_filename(file_name).title)
            .unwrap_or_else(|| file_name.to_string());

        let outcome = match attach_to {
            Some(work_id) => {
                let work = Work::get_by_id(work_id, &self.db).await?;
                let edition = build_edition(&work.id, &asset.id, edition_title, embedded);
                let result = self
                    .db
                    .query(
                        r"
                        BEGIN TRANSACTION;
                        CREATE type::thing('asset', $asset.id) CONTENT $asset;
                        CREATE type::thing('edition', $edition.id) CONTENT $edition;
                        COMMIT TRANSACTION;
                        ",
                    )
                    .bind(("asset", asset.clone()))
                    .bind(("edition", edition.clone()))
                    .await;
                if let Err(err) = check_persist(result) {
                    if let Some(skipped) = recover_duplicate(&err, checksum, &self.db).await? {
                        return Ok(skipped);
                    }
                    return Err(err);
                }
                IngestResult::AddedEdition {
                    work_id: work.id,
                    edition_id: edition.id,
                    asset_id: asset.id,
                }
            }
            None => {
                let (work, contributors) = build_work(user_id, embedded);
                let edition = build_edition(&work.id, &asset.id, edition_title, embedded);
                let result = self
                    .db
                    .query(
                        r"
                        BEGIN TRANSACTION;
                        CREATE type::thing('asset', $asset.id) CONTENT $asset;
                        CREATE type::thing('work', $work.id) CONTENT $work;
                        CREATE type::thing('edition', $edition.id) CONTENT $edition;
                        FOR $contributor IN $contributors {
                            CREATE type::thing('contributor', $contributor.id) CONTENT $contributor;
                        };
                        COMMIT TRANSACTION;
                        ",
                    )
                    .bind(("asset", asset.clone()))
                    .bind(("work", work.clone()))
                    .bind(("edition", edition.clone()))
                    .bind(("contributors", contributors))
                    .await;
                if let Err(err) = check_persist(result) {
                    if let Some(skipped) = recover_duplicate(&err, checksum, &self.db).await? {
                        return Ok(skipped);
                    }
                    return Err(err);
                }
                IngestResult::Created {
                    work_id: work.id,
                    edition_id: edition.id,
                    asset_id: asset.id,
                }
            }
        };

        machine
            .persist()
            .map_err(|(_, guard)| map_guard_error("persist", &guard))?;
        info!(?outcome, "ingest persisted");
        Ok(outcome)
    }

    /// Best-effort: the extracted cover lands next to the asset bytes.
    async fn store_cover_sidecar(&self, storage_key: &str, embedded: &EmbeddedMetadata) {
        let Some(cover) = &embedded.cover else {
            return;
        };
        let location = format!("{storage_key}.cover");
        if let Err(err) = self
            .storage
            .put(&location, Bytes::from(cover.clone()))
            .await
        {
            warn!(error = %err, location = %location, "failed to store cover sidecar");
        }
    }

    fn progress(&self, user_id: &str, upload_id: &str, stage: &str) {
        self.events.emit(
            user_id,
            ImportEvent::Progress {
                upload_id: upload_id.to_string(),
                stage: stage.to_string(),
            },
        );
    }

    fn announce(&self, user_id: &str, upload_id: &str, result: &IngestResult) {
        let event = match result {
            IngestResult::Created {
                work_id,
                edition_id,
                ..
            }
            | IngestResult::AddedEdition {
                work_id,
                edition_id,
                ..
            } => ImportEvent::Completed {
                upload_id: upload_id.to_string(),
                work_id: work_id.clone(),
                edition_id: edition_id.clone(),
            },
            IngestResult::Skipped { reason, .. } => ImportEvent::Skipped {
                upload_id: upload_id.to_string(),
                reason: reason.clone(),
            },
            IngestResult::NeedsConfirmation { pending_id, reason } => ImportEvent::Duplicate {
                upload_id: upload_id.to_string(),
                pending_id: pending_id.clone(),
                reason: *reason,
            },
        };
        self.events.emit(user_id, event);
    }

    /// Enrichment and indexing run after the ingest commits; both are
    /// independently failable and never surface to the caller.
    fn spawn_background(&self, user_id: &str, upload_id: &str, result: &IngestResult) {
        let (work_id, asset_id) = match result {
            IngestResult::Created {
                work_id, asset_id, ..
            }
            | IngestResult::AddedEdition {
                work_id, asset_id, ..
            } => (work_id.clone(), asset_id.clone()),
            _ => return,
        };

        if self.config.enrich_after_ingest {
            let enrichment = Arc::clone(&self.enrichment);
            let events = Arc::clone(&self.events);
            let user = user_id.to_string();
            let upload = upload_id.to_string();
            let work = work_id.clone();
            tokio::spawn(async move {
                events.emit(
                    &user,
                    ImportEvent::EnrichmentStarted {
                        upload_id: upload.clone(),
                        work_id: work.clone(),
                    },
                );
                match enrichment.trigger(&work, &user).await {
                    Ok(outcome) => events.emit(
                        &user,
                        ImportEvent::EnrichmentCompleted {
                            upload_id: upload,
                            work_id: work,
                            improvement_count: outcome.improvement_count,
                        },
                    ),
                    Err(err) => {
                        warn!(work_id = %work, error = %err, "background enrichment failed");
                        events.emit(
                            &user,
                            ImportEvent::EnrichmentFailed {
                                upload_id: upload,
                                work_id: work,
                                message: err.to_string(),
                            },
                        );
                    }
                }
            });
        }

        let indexer = Arc::clone(&self.indexer);
        tokio::spawn(async move {
            if let Err(err) = indexer.index_asset(&asset_id).await {
                warn!(asset_id = %asset_id, error = %err, "content indexing failed");
            }
        });
    }
}

/// A machine already driven to `Resolved`, for the confirmation path
/// where fetch/parse happened in the original ingest run.
fn confirmed_machine() -> Result<IngestMachine<(), Resolved>, AppError> {
    ready()
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))?
        .parse()
        .map_err(|(_, guard)| map_guard_error("parse", &guard))?
        .resolve()
        .map_err(|(_, guard)| map_guard_error("resolve", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingest transition during {event}: {guard:?}"
    ))
}

fn check_persist(
    result: Result<surrealdb::Response, surrealdb::Error>,
) -> Result<(), AppError> {
    let mut response = result?;
    let errors = response.take_errors();
    if let Some((_, error)) = errors.into_iter().next() {
        return Err(AppError::Database(error));
    }
    Ok(())
}

/// A lost race against the unique checksum index means the asset already
/// exists; that ingest is skipped, not failed.
async fn recover_duplicate(
    err: &AppError,
    checksum: &str,
    db: &SurrealDbClient,
) -> Result<Option<IngestResult>, AppError> {
    let AppError::Database(db_err) = err else {
        return Ok(None);
    };
    if !db_err.to_string().contains("idx_asset_checksum") {
        return Ok(None);
    }
    Ok(Asset::get_by_checksum(checksum, db)
        .await?
        .map(|asset| IngestResult::Skipped {
            asset_id: Some(asset.id),
            reason: DUPLICATE_FILE_REASON.to_string(),
        }))
}

fn build_work(user_id: &str, embedded: &EmbeddedMetadata) -> (Work, Vec<Contributor>) {
    let mut work = Work::new(user_id, embedded.title.clone());
    if let Some(raw_isbn) = embedded.isbn() {
        work.isbn_13 = isbn::normalize(raw_isbn);
        let cleaned = isbn::clean(raw_isbn);
        if isbn::is_valid_isbn10(&cleaned) {
            work.isbn_10 = Some(cleaned);
        }
    }
    work.language = embedded.language.clone();
    work.synopsis = embedded.synopsis.clone();
    work.published_at = embedded.date_published.as_deref().map(|raw| {
        dates::PartialDate::parse(raw)
            .map_or_else(|| raw.to_string(), |date| date.to_iso())
    });

    let contributors = embedded
        .contributors
        .iter()
        .filter_map(|contributor| {
            let display = authors::canonical_display(&contributor.name);
            let sorting_key = authors::PersonName::parse(&contributor.name)
                .map_or_else(|| display.clone(), |name| name.sorting_key());
            Contributor::new(&work.id, display, sorting_key, vec![contributor.role]).ok()
        })
        .collect();

    (work, contributors)
}

fn build_edition(
    work_id: &str,
    asset_id: &str,
    title: String,
    embedded: &EmbeddedMetadata,
) -> Edition {
    let mut edition = Edition::new(work_id, title, asset_id);
    edition.synopsis = embedded.synopsis.clone();
    edition.language = embedded.language.clone();
    if let Some(raw_isbn) = embedded.isbn() {
        edition.isbn_13 = isbn::normalize(raw_isbn);
        let cleaned = isbn::clean(raw_isbn);
        if isbn::is_valid_isbn10(&cleaned) {
            edition.isbn_10 = Some(cleaned);
        }
    }
    edition
}
