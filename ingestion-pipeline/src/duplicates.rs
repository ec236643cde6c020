use tracing::debug;

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::contributor::Contributor;
use common::storage::types::edition::Edition;
use common::storage::types::work::Work;
use enrichment_pipeline::reconcile::{authors, isbn};

use crate::extract::EmbeddedMetadata;

/// Outcome of the duplicate policy checks for one parsed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// Nothing similar exists; create freely.
    None,
    /// An edition with this ISBN already exists on these works.
    Edition { work_ids: Vec<String> },
    /// A work with this title and a canonically matching author exists.
    Work { work_ids: Vec<String> },
}

/// Runs the pre-persist duplicate checks.
///
/// ISBN equality marks an edition duplicate. Without any ISBN, a
/// normalized title hit combined with at least one canonically matching
/// author marks a work duplicate. With neither, creation proceeds and
/// later merges are left to the pending queue.
pub async fn check(
    embedded: &EmbeddedMetadata,
    db: &SurrealDbClient,
) -> Result<DuplicateCheck, AppError> {
    if let Some(raw_isbn) = embedded.isbn() {
        if let Some(normalized) = isbn::normalize(raw_isbn) {
            let mut editions = Edition::find_by_isbn(&normalized, db).await?;
            let cleaned = isbn::clean(raw_isbn);
            if cleaned != normalized {
                editions.extend(Edition::find_by_isbn(&cleaned, db).await?);
            }
            if !editions.is_empty() {
                let mut work_ids: Vec<String> = Vec::new();
                for edition in editions {
                    if !work_ids.contains(&edition.work_id) {
                        work_ids.push(edition.work_id);
                    }
                }
                debug!(isbn = %normalized, works = work_ids.len(), "edition duplicate suspected");
                return Ok(DuplicateCheck::Edition { work_ids });
            }
        }
        // A fresh ISBN is the strongest signal this is a new edition.
        return Ok(DuplicateCheck::None);
    }

    let Some(title) = embedded.title.as_deref() else {
        return Ok(DuplicateCheck::None);
    };
    let upload_authors = embedded.authors();
    if upload_authors.is_empty() {
        return Ok(DuplicateCheck::None);
    }

    let candidates = Work::find_by_title_key(&Work::title_key_of(title), db).await?;
    let mut work_ids = Vec::new();
    for work in candidates {
        let contributors = Contributor::list_for_work(&work.id, db).await?;
        let matches = contributors.iter().any(|contributor| {
            upload_authors
                .iter()
                .any(|author| authors::names_match(author, &contributor.name))
        });
        if matches {
            work_ids.push(work.id);
        }
    }

    if work_ids.is_empty() {
        Ok(DuplicateCheck::None)
    } else {
        debug!(title = %title, works = work_ids.len(), "work duplicate suspected");
        Ok(DuplicateCheck::Work { work_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{EmbeddedContributor, Identifier};
    use common::storage::types::contributor::Relator;
    use uuid::Uuid;

    async fn db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");
        db
    }

    fn embedded_with_isbn(isbn: &str) -> EmbeddedMetadata {
        EmbeddedMetadata {
            title: Some("Some Book".into()),
            identifiers: vec![Identifier::Isbn(isbn.into())],
            ..EmbeddedMetadata::default()
        }
    }

    fn embedded_with_author(title: &str, author: &str) -> EmbeddedMetadata {
        EmbeddedMetadata {
            title: Some(title.into()),
            contributors: vec![EmbeddedContributor {
                name: author.into(),
                role: Relator::Aut,
            }],
            ..EmbeddedMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_isbn_match_flags_edition_duplicate() {
        let db = db().await;
        let mut edition = Edition::new("work-1", "Some Book".into(), "asset-1");
        edition.isbn_13 = Some("9783446274860".into());
        db.store_item(edition).await.expect("store");

        // The hyphenated upload ISBN normalizes onto the stored one.
        let check = check(&embedded_with_isbn("978-3-446-27486-0"), &db)
            .await
            .expect("check");
        assert_eq!(
            check,
            DuplicateCheck::Edition {
                work_ids: vec!["work-1".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_fresh_isbn_skips_title_checks() {
        let db = db().await;
        // Same title exists, but the upload carries an unseen ISBN.
        let work = Work::new("u", Some("Some Book".into()));
        db.store_item(work.clone()).await.expect("store");

        let result = check(&embedded_with_isbn("9780306406157"), &db)
            .await
            .expect("check");
        assert_eq!(result, DuplicateCheck::None);
    }

    #[tokio::test]
    async fn test_title_and_author_match_flags_work_duplicate() {
        let db = db().await;
        let work = Work::new("u", Some("Die Vermessung der Welt".into()));
        db.store_item(work.clone()).await.expect("store");
        let contributor = Contributor::new(
            &work.id,
            "Daniel Kehlmann".into(),
            "Kehlmann, Daniel".into(),
            vec![Relator::Aut],
        )
        .expect("contributor");
        db.store_item(contributor).await.expect("store");

        // Comma-form author and differently cased title still match.
        let result = check(
            &embedded_with_author("die vermessung der welt", "Kehlmann, Daniel"),
            &db,
        )
        .await
        .expect("check");
        assert_eq!(
            result,
            DuplicateCheck::Work {
                work_ids: vec![work.id]
            }
        );
    }

    #[tokio::test]
    async fn test_title_match_without_author_match_creates_freely() {
        let db = db().await;
        let work = Work::new("u", Some("Collected Poems".into()));
        db.store_item(work.clone()).await.expect("store");
        let contributor = Contributor::new(
            &work.id,
            "Sylvia Plath".into(),
            "Plath, Sylvia".into(),
            vec![Relator::Aut],
        )
        .expect("contributor");
        db.store_item(contributor).await.expect("store");

        let result = check(
            &embedded_with_author("Collected Poems", "Dylan Thomas"),
            &db,
        )
        .await
        .expect("check");
        assert_eq!(result, DuplicateCheck::None);
    }

    #[tokio::test]
    async fn test_no_signals_creates_freely() {
        let db = db().await;
        let result = check(&EmbeddedMetadata::default(), &db).await.expect("check");
        assert_eq!(result, DuplicateCheck::None);
    }
}
