use tracing::warn;

use common::error::AppError;
use common::storage::types::contributor::Relator;
use mobi_parser::{MobiDocument, PageProgression};

use super::{EmbeddedContributor, EmbeddedMetadata, Identifier};

/// Extracts embedded metadata from a MOBI6/KF8 container.
///
/// Parser failures are fatal for the ingest; a missing or broken cover is
/// not.
pub fn extract(bytes: &[u8]) -> Result<EmbeddedMetadata, AppError> {
    let doc = MobiDocument::open(bytes.to_vec()).map_err(|e| AppError::Parse(e.to_string()))?;
    let source = doc.metadata().clone();

    let mut metadata = EmbeddedMetadata {
        title: source.title.clone(),
        date_published: source.published.clone(),
        language: source.language.clone(),
        synopsis: source.description.clone(),
        publisher: source.publisher.clone(),
        rights: source.rights.clone(),
        subjects: source.subjects.clone(),
        page_progression: source.page_progression.map(|direction| {
            match direction {
                PageProgression::LeftToRight => "ltr",
                PageProgression::RightToLeft => "rtl",
            }
            .to_string()
        }),
        ..EmbeddedMetadata::default()
    };

    for creator in &source.creators {
        metadata.contributors.push(EmbeddedContributor {
            name: creator.clone(),
            role: Relator::Aut,
        });
    }
    for contributor in &source.contributors {
        metadata.contributors.push(EmbeddedContributor {
            name: contributor.clone(),
            role: Relator::Ctb,
        });
    }

    if let Some(isbn) = &source.isbn {
        metadata.identifiers.push(Identifier::Isbn(isbn.clone()));
    }
    if let Some(asin) = &source.asin {
        metadata.identifiers.push(Identifier::Asin(asin.clone()));
    }
    for origin in &source.sources {
        metadata.identifiers.push(Identifier::Source(origin.clone()));
    }

    metadata
        .properties
        .insert("mobi_uid".into(), source.uid.to_string());
    if !source.subject_codes.is_empty() {
        metadata
            .properties
            .insert("subject_codes".into(), source.subject_codes.join(";"));
    }
    if let Some(fixed_layout) = source.fixed_layout {
        metadata
            .properties
            .insert("fixed_layout".into(), fixed_layout.to_string());
    }
    if let Some(resolution) = &source.orig_resolution {
        metadata
            .properties
            .insert("original_resolution".into(), resolution.clone());
    }

    match doc.cover() {
        Ok(cover) => metadata.cover = cover,
        Err(err) => warn!(error = %err, "cover extraction failed; continuing without one"),
    }

    Ok(metadata)
}
