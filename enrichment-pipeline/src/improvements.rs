use common::metadata::{FieldImprovement, Preview};
use common::storage::types::work::Work;

/// Per-field confidence thresholds a proposal must exceed before it is
/// offered as an improvement. Fields not listed use the default.
fn threshold(field: &str) -> f64 {
    match field {
        "title" | "language" => 0.8,
        "description" | "publication_date" | "pages" | "series" => 0.7,
        "subjects" => 0.6,
        _ => 0.7,
    }
}

/// Whether the work currently lacks a value for the field. Fields the
/// work rows cannot hold (subjects, series, cover) always count as
/// missing; they surface in the preview even though apply has no column
/// to write them to.
fn work_lacks(field: &str, work: &Work, contributor_count: usize) -> bool {
    match field {
        "title" => work.title.is_none(),
        "authors" => contributor_count == 0,
        "description" => work.synopsis.is_none(),
        "publication_date" => work.published_at.is_none(),
        "language" => work.language.is_none(),
        "pages" => work.pages.is_none(),
        "isbn" => !work.has_isbn(),
        _ => true,
    }
}

/// Step 6: a field becomes an improvement when its confidence clears the
/// threshold and the work has no value for it yet.
pub fn compute(preview: &Preview, work: &Work, contributor_count: usize) -> Vec<FieldImprovement> {
    preview
        .fields()
        .filter(|(name, proposal)| proposal.confidence > threshold(name))
        .filter(|(name, _)| work_lacks(name, work, contributor_count))
        .map(|(name, proposal)| FieldImprovement {
            field: name.to_string(),
            value: proposal.value.clone(),
            confidence: proposal.confidence,
            sources: proposal.sources.clone(),
        })
        .collect()
}
