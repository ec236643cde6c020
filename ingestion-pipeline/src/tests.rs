//! End-to-end ingest flows over in-memory storage and database.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use common::metadata::MetadataRecord;
use common::storage::db::SurrealDbClient;
use common::storage::store::testing::TestStorageManager;
use common::storage::types::asset::Asset;
use common::storage::types::contributor::{Contributor, Relator};
use common::storage::types::edition::Edition;
use common::storage::types::pending_ingest::{DuplicateReason, PendingIngest};
use common::storage::types::work::Work;
use common::utils::config::DuplicatePolicy;
use enrichment_pipeline::cache::{CacheConfig, ProviderCache};
use enrichment_pipeline::coordinator::{CoordinatorConfig, ProviderCoordinator};
use enrichment_pipeline::provider::{MetadataProvider, ProviderError, ProviderField};
use enrichment_pipeline::query::ProviderQuery;
use enrichment_pipeline::reconcile::ReconcileOptions;
use enrichment_pipeline::retry::RetryPolicy;
use enrichment_pipeline::EnrichmentService;
use mobi_parser::{exth_tag, test_support::MobiBuilder};

use crate::events::{EventBroker, ImportEvent};
use crate::orchestrator::{
    ConfirmAction, IngestConfig, IngestResult, IngestionOrchestrator, NoopIndexer,
    PresignOutcome,
};

/// Replays a fixed record set; enough provider for background enrichment.
struct FixedProvider {
    records: Vec<MetadataRecord>,
}

#[async_trait]
impl MetadataProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn supports(&self, _field: ProviderField) -> bool {
        true
    }

    fn reliability(&self, _field: ProviderField) -> f64 {
        0.9
    }

    async fn search_by_title(
        &self,
        _title: &str,
        _query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        Ok(self.records.clone())
    }

    async fn search_by_isbn(&self, _isbn: &str) -> Result<Vec<MetadataRecord>, ProviderError> {
        Ok(self.records.clone())
    }

    async fn search_by_creator(
        &self,
        _creator: &str,
        _query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        Ok(self.records.clone())
    }
}

struct Fixture {
    db: Arc<SurrealDbClient>,
    storage: TestStorageManager,
    events: Arc<EventBroker>,
    orchestrator: IngestionOrchestrator,
}

async fn fixture_with(
    config: IngestConfig,
    provider_records: Vec<MetadataRecord>,
) -> Fixture {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb"),
    );
    db.ensure_initialized().await.expect("indexes");

    let storage = TestStorageManager::new_memory().await.expect("storage");
    let events = Arc::new(EventBroker::new());

    let providers: Vec<Arc<dyn MetadataProvider>> = if provider_records.is_empty() {
        Vec::new()
    } else {
        vec![Arc::new(FixedProvider {
            records: provider_records,
        })]
    };
    let coordinator = Arc::new(ProviderCoordinator::new(
        providers,
        Arc::new(ProviderCache::new(CacheConfig::default())),
        CoordinatorConfig::default(),
        RetryPolicy::default(),
    ));
    let enrichment = Arc::new(EnrichmentService::new(
        Arc::clone(&db),
        coordinator,
        ReconcileOptions::default(),
    ));

    let orchestrator = IngestionOrchestrator::new(
        Arc::clone(&db),
        storage.storage().clone(),
        Arc::clone(&events),
        enrichment,
        Arc::new(NoopIndexer),
        config,
    );

    Fixture {
        db,
        storage,
        events,
        orchestrator,
    }
}

async fn fixture() -> Fixture {
    fixture_with(
        IngestConfig {
            enrich_after_ingest: false,
            ..IngestConfig::default()
        },
        Vec::new(),
    )
    .await
}

fn checksum_base64(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    STANDARD.encode(hasher.finalize())
}

fn kehlmann_mobi(text: &str) -> Vec<u8> {
    MobiBuilder::new("Die Vermessung der Welt")
        .text(text)
        .locale(7, 0)
        .exth_string(exth_tag::CREATOR, "Kehlmann, Daniel")
        .exth_string(exth_tag::ISBN, "9783446274860")
        .build()
}

/// Presigns and stores the bytes; returns the storage key.
async fn upload(fixture: &Fixture, file_name: &str, bytes: &[u8]) -> String {
    let outcome = fixture
        .orchestrator
        .presign_upload(
            "alice",
            "upload-1",
            &checksum_base64(bytes),
            bytes.len() as u64,
            file_name,
        )
        .await
        .expect("presign");
    let PresignOutcome::Upload { storage_key, .. } = outcome else {
        panic!("expected a fresh upload, got {outcome:?}");
    };
    fixture
        .storage
        .put(&storage_key, bytes)
        .await
        .expect("store upload");
    storage_key
}

#[tokio::test]
async fn test_presign_detects_exact_duplicates() {
    let fixture = fixture().await;
    let mut events = fixture.events.subscribe("alice");

    let asset = Asset::new(
        Asset::checksum_hex(b"already stored"),
        "application/epub+zip".into(),
        1024,
        "existing/key.epub".into(),
        "x.epub".into(),
    )
    .expect("asset");
    fixture.db.store_item(asset.clone()).await.expect("store");

    let outcome = fixture
        .orchestrator
        .presign_upload(
            "alice",
            "upload-1",
            &checksum_base64(b"already stored"),
            1024,
            "x.epub",
        )
        .await
        .expect("presign");

    assert_eq!(
        outcome,
        PresignOutcome::Duplicate {
            existing_asset_id: asset.id
        }
    );
    match events.recv().await.expect("event") {
        ImportEvent::Skipped { reason, .. } => {
            assert_eq!(reason, "Exact duplicate file already exists in library");
        }
        other => panic!("expected skipped event, got {other:?}"),
    }

    // Idempotent per checksum: a repeat lands in the same outcome.
    let repeat = fixture
        .orchestrator
        .presign_upload(
            "alice",
            "upload-1",
            &checksum_base64(b"already stored"),
            1024,
            "x.epub",
        )
        .await
        .expect("repeat presign");
    assert_eq!(repeat, outcome);
}

#[tokio::test]
async fn test_presign_issues_uuid_prefixed_keys() {
    let fixture = fixture().await;
    let outcome = fixture
        .orchestrator
        .presign_upload(
            "alice",
            "upload-1",
            &checksum_base64(b"new bytes"),
            9,
            "Ein Büch & Mehr.mobi",
        )
        .await
        .expect("presign");

    let PresignOutcome::Upload {
        upload_url,
        storage_key,
    } = outcome
    else {
        panic!("expected upload outcome");
    };
    let (prefix, name) = storage_key.split_once('/').expect("uuid prefix");
    assert!(Uuid::parse_str(prefix).is_ok());
    assert_eq!(name, "Ein_Buch_and_Mehr.mobi");
    assert_eq!(upload_url, format!("/api/v1/books/upload/{storage_key}"));
}

#[tokio::test]
async fn test_presign_rejects_bad_input() {
    let fixture = fixture().await;
    assert!(fixture
        .orchestrator
        .presign_upload("alice", "u", "!!!not-base64!!!", 10, "x.mobi")
        .await
        .is_err());
    assert!(fixture
        .orchestrator
        .presign_upload("alice", "u", &checksum_base64(b"x"), 0, "x.mobi")
        .await
        .is_err());
}

#[tokio::test]
async fn test_clean_ingest_creates_work_edition_and_contributors() {
    let fixture = fixture().await;
    let mut events = fixture.events.subscribe("alice");

    let bytes = kehlmann_mobi("Im September 1828...");
    let storage_key = upload(&fixture, "vermessung.mobi", &bytes).await;

    let result = fixture
        .orchestrator
        .ingest("alice", "upload-1", &storage_key, "vermessung.mobi")
        .await
        .expect("ingest");

    let IngestResult::Created {
        work_id,
        edition_id,
        asset_id,
    } = result
    else {
        panic!("expected created, got {result:?}");
    };

    let work = Work::get_by_id(&work_id, &fixture.db).await.expect("work");
    assert_eq!(work.title.as_deref(), Some("Die Vermessung der Welt"));
    assert_eq!(work.isbn_13.as_deref(), Some("9783446274860"));
    assert_eq!(work.language.as_deref(), Some("de"));
    assert_eq!(work.created_by, "alice");

    let edition = Edition::get_by_id(&edition_id, &fixture.db)
        .await
        .expect("edition");
    assert_eq!(edition.title, "Die Vermessung der Welt");
    assert_eq!(edition.work_id, work_id);
    assert_eq!(edition.asset_id, asset_id);
    assert_eq!(edition.isbn_13.as_deref(), Some("9783446274860"));

    let contributors = Contributor::list_for_work(&work_id, &fixture.db)
        .await
        .expect("contributors");
    assert_eq!(contributors.len(), 1);
    assert_eq!(contributors[0].name, "Daniel Kehlmann");
    assert_eq!(contributors[0].sorting_key, "Kehlmann, Daniel");
    assert_eq!(contributors[0].roles, vec![Relator::Aut]);

    let asset = Asset::get_by_id(&asset_id, &fixture.db).await.expect("asset");
    assert_eq!(asset.media_type, "application/x-mobipocket-ebook");
    assert_eq!(asset.size, bytes.len() as u64);

    // Progress events, then completion, in program order.
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        if let ImportEvent::Completed {
            work_id: event_work,
            ..
        } = event
        {
            assert_eq!(event_work, work_id);
            saw_completed = true;
        }
    }
    assert!(saw_completed);
}

#[tokio::test]
async fn test_reingesting_identical_bytes_is_skipped() {
    let fixture = fixture().await;
    let bytes = kehlmann_mobi("same bytes");

    let first_key = upload(&fixture, "one.mobi", &bytes).await;
    let first = fixture
        .orchestrator
        .ingest("alice", "upload-1", &first_key, "one.mobi")
        .await
        .expect("first ingest");
    let IngestResult::Created { asset_id, .. } = first else {
        panic!("expected created");
    };

    // Same content lands under a different key (retry path).
    let second_key = format!("{}/copy.mobi", Uuid::new_v4());
    fixture
        .storage
        .put(&second_key, &bytes)
        .await
        .expect("store copy");
    let second = fixture
        .orchestrator
        .ingest("alice", "upload-2", &second_key, "copy.mobi")
        .await
        .expect("second ingest");

    assert_eq!(
        second,
        IngestResult::Skipped {
            asset_id: Some(asset_id),
            reason: "Exact duplicate file already exists in library".to_string()
        }
    );

    let assets: Vec<Asset> = fixture.db.get_all_stored_items().await.expect("assets");
    assert_eq!(assets.len(), 1, "one asset row per distinct checksum");
}

#[tokio::test]
async fn test_isbn_duplicate_prompts_and_attaches_on_confirmation() {
    let fixture = fixture().await;

    let first = kehlmann_mobi("first edition text");
    let first_key = upload(&fixture, "first.mobi", &first).await;
    let created = fixture
        .orchestrator
        .ingest("alice", "upload-1", &first_key, "first.mobi")
        .await
        .expect("first ingest");
    let IngestResult::Created { work_id, .. } = created else {
        panic!("expected created");
    };

    // Different bytes, same ISBN.
    let second = kehlmann_mobi("revised edition text");
    let second_key = upload(&fixture, "second.mobi", &second).await;
    let parked = fixture
        .orchestrator
        .ingest("alice", "upload-2", &second_key, "second.mobi")
        .await
        .expect("second ingest");

    let IngestResult::NeedsConfirmation { pending_id, reason } = parked else {
        panic!("expected confirmation, got {parked:?}");
    };
    assert_eq!(reason, DuplicateReason::DuplicateEdition);

    // No new rows were created while parked.
    let works: Vec<Work> = fixture.db.get_all_stored_items().await.expect("works");
    assert_eq!(works.len(), 1);
    let editions: Vec<Edition> = fixture.db.get_all_stored_items().await.expect("editions");
    assert_eq!(editions.len(), 1);

    let confirmed = fixture
        .orchestrator
        .confirm_ingest("alice", "upload-2", &pending_id, ConfirmAction::CreateEdition)
        .await
        .expect("confirm");
    let IngestResult::AddedEdition {
        work_id: attached_work,
        ..
    } = confirmed
    else {
        panic!("expected added edition, got {confirmed:?}");
    };
    assert_eq!(attached_work, work_id);

    let editions = Edition::list_for_work(&work_id, &fixture.db)
        .await
        .expect("editions");
    assert_eq!(editions.len(), 2);

    // A pending ingest resolves exactly once.
    let again = fixture
        .orchestrator
        .confirm_ingest("alice", "upload-2", &pending_id, ConfirmAction::Skip)
        .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn test_confirm_skip_deletes_the_pending_row() {
    let fixture = fixture().await;

    let first = kehlmann_mobi("v1");
    let key = upload(&fixture, "a.mobi", &first).await;
    fixture
        .orchestrator
        .ingest("alice", "u1", &key, "a.mobi")
        .await
        .expect("ingest");

    let second = kehlmann_mobi("v2");
    let key2 = upload(&fixture, "b.mobi", &second).await;
    let parked = fixture
        .orchestrator
        .ingest("alice", "u2", &key2, "b.mobi")
        .await
        .expect("ingest");
    let IngestResult::NeedsConfirmation { pending_id, .. } = parked else {
        panic!("expected confirmation");
    };

    let skipped = fixture
        .orchestrator
        .confirm_ingest("alice", "u2", &pending_id, ConfirmAction::Skip)
        .await
        .expect("confirm");
    assert!(matches!(skipped, IngestResult::Skipped { .. }));

    let rows: Vec<PendingIngest> = fixture.db.get_all_stored_items().await.expect("rows");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_confirm_create_work_forks_a_new_work() {
    let fixture = fixture().await;

    let first = kehlmann_mobi("v1");
    let key = upload(&fixture, "a.mobi", &first).await;
    fixture
        .orchestrator
        .ingest("alice", "u1", &key, "a.mobi")
        .await
        .expect("ingest");

    let second = kehlmann_mobi("v2");
    let key2 = upload(&fixture, "b.mobi", &second).await;
    let parked = fixture
        .orchestrator
        .ingest("alice", "u2", &key2, "b.mobi")
        .await
        .expect("ingest");
    let IngestResult::NeedsConfirmation { pending_id, .. } = parked else {
        panic!("expected confirmation");
    };

    let result = fixture
        .orchestrator
        .confirm_ingest("alice", "u2", &pending_id, ConfirmAction::CreateWork)
        .await
        .expect("confirm");
    assert!(matches!(result, IngestResult::Created { .. }));

    let works: Vec<Work> = fixture.db.get_all_stored_items().await.expect("works");
    assert_eq!(works.len(), 2);
}

#[tokio::test]
async fn test_skip_policy_short_circuits_edition_duplicates() {
    let fixture = fixture_with(
        IngestConfig {
            on_duplicate_edition: DuplicatePolicy::Skip,
            enrich_after_ingest: false,
            ..IngestConfig::default()
        },
        Vec::new(),
    )
    .await;

    let first = kehlmann_mobi("v1");
    let key = upload(&fixture, "a.mobi", &first).await;
    fixture
        .orchestrator
        .ingest("alice", "u1", &key, "a.mobi")
        .await
        .expect("ingest");

    let second = kehlmann_mobi("v2");
    let key2 = upload(&fixture, "b.mobi", &second).await;
    let result = fixture
        .orchestrator
        .ingest("alice", "u2", &key2, "b.mobi")
        .await
        .expect("ingest");
    assert!(matches!(result, IngestResult::Skipped { asset_id: None, .. }));
}

#[tokio::test]
async fn test_title_author_duplicate_without_isbn_prompts() {
    let fixture = fixture().await;

    let build = |text: &str| {
        MobiBuilder::new("Collected Essays")
            .text(text)
            .exth_string(exth_tag::CREATOR, "Jane Doe")
            .build()
    };

    let key = upload(&fixture, "essays.mobi", &build("first")).await;
    let first = fixture
        .orchestrator
        .ingest("alice", "u1", &key, "essays.mobi")
        .await
        .expect("ingest");
    assert!(matches!(first, IngestResult::Created { .. }));

    let key2 = upload(&fixture, "essays2.mobi", &build("second")).await;
    let second = fixture
        .orchestrator
        .ingest("alice", "u2", &key2, "essays2.mobi")
        .await
        .expect("ingest");
    let IngestResult::NeedsConfirmation { reason, .. } = second else {
        panic!("expected confirmation, got {second:?}");
    };
    assert_eq!(reason, DuplicateReason::DuplicateWork);
}

#[tokio::test]
async fn test_parse_failure_emits_failed_and_writes_nothing() {
    let fixture = fixture().await;
    let mut events = fixture.events.subscribe("alice");

    // Valid fingerprint, garbage body.
    let mut bytes = vec![0u8; 96];
    bytes[60..68].copy_from_slice(b"BOOKMOBI");
    let key = upload(&fixture, "broken.mobi", &bytes).await;

    let result = fixture
        .orchestrator
        .ingest("alice", "u1", &key, "broken.mobi")
        .await;
    assert!(result.is_err());

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ImportEvent::Failed { .. }) {
            saw_failed = true;
        }
    }
    assert!(saw_failed);

    let works: Vec<Work> = fixture.db.get_all_stored_items().await.expect("works");
    assert!(works.is_empty());
    let assets: Vec<Asset> = fixture.db.get_all_stored_items().await.expect("assets");
    assert!(assets.is_empty());
}

#[tokio::test]
async fn test_missing_upload_bytes_fail_the_ingest() {
    let fixture = fixture().await;
    let result = fixture
        .orchestrator
        .ingest("alice", "u1", "nonexistent/key.mobi", "key.mobi")
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cover_lands_as_sidecar_object() {
    let fixture = fixture().await;
    let jpeg = [0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3];
    let bytes = MobiBuilder::new("Covered").text("x").cover(&jpeg).build();
    let key = upload(&fixture, "covered.mobi", &bytes).await;

    fixture
        .orchestrator
        .ingest("alice", "u1", &key, "covered.mobi")
        .await
        .expect("ingest");

    let sidecar = fixture
        .storage
        .get(&format!("{key}.cover"))
        .await
        .expect("cover sidecar");
    assert_eq!(sidecar.as_ref(), &jpeg[..]);
}

#[tokio::test]
async fn test_background_enrichment_emits_lifecycle_events() {
    let records: Vec<MetadataRecord> = (0..3)
        .map(|_| {
            let mut record = MetadataRecord::new("fixed", 0.9);
            record.title = Some("Die Vermessung der Welt".into());
            record.authors = vec!["Daniel Kehlmann".into()];
            record.description = Some("A synopsis from the provider.".into());
            record.pages = Some(302);
            record
        })
        .collect();

    let fixture = fixture_with(IngestConfig::default(), records).await;
    let mut events = fixture.events.subscribe("alice");

    let bytes = kehlmann_mobi("body");
    let key = upload(&fixture, "v.mobi", &bytes).await;
    fixture
        .orchestrator
        .ingest("alice", "u1", &key, "v.mobi")
        .await
        .expect("ingest");

    let mut saw_started = false;
    let mut saw_completed = false;
    for _ in 0..16 {
        match tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await {
            Ok(Ok(ImportEvent::EnrichmentStarted { .. })) => saw_started = true,
            Ok(Ok(ImportEvent::EnrichmentCompleted { .. })) => {
                saw_completed = true;
                break;
            }
            Ok(Ok(ImportEvent::EnrichmentFailed { message, .. })) => {
                panic!("enrichment failed: {message}");
            }
            Ok(Ok(_)) => {}
            _ => break,
        }
    }
    assert!(saw_started);
    assert!(saw_completed);
}
