pub mod authors;
pub mod confidence;
pub mod dates;
pub mod fields;
pub mod isbn;
pub mod language;
pub mod subjects;

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use common::metadata::{FieldProposal, MetadataRecord, Preview, PreviewSummary};

use crate::provider::ProviderField;
use confidence::ConfidenceInputs;
use dates::PartialDate;
use fields::{FieldInput, FieldSelection};
use subjects::{SubjectInput, SubjectScheme};

/// Supplies per-source reliability scores to the reconciler.
pub trait ReliabilitySource: Send + Sync {
    fn score(&self, source: &str, field: ProviderField) -> f64;
}

/// Flat per-source reliability, for tests and static configuration.
pub struct StaticReliability(pub HashMap<String, f64>);

impl ReliabilitySource for StaticReliability {
    fn score(&self, source: &str, _field: ProviderField) -> f64 {
        self.0.get(source).copied().unwrap_or(0.5)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub preferred_language: Option<String>,
}

/// Reconciles provider records into one preview.
///
/// Records are first clustered into "same work" groups (see
/// [`pick_work_group`]); the densest, most confident cluster is then
/// reconciled field by field.
pub fn reconcile(
    records: &[MetadataRecord],
    options: &ReconcileOptions,
    reliability: &dyn ReliabilitySource,
) -> Preview {
    let group = pick_work_group(records);
    if group.is_empty() {
        return Preview::default();
    }
    debug!(
        grouped = group.len(),
        total = records.len(),
        "reconciling work group"
    );

    let mut preview = Preview::default();
    let mut conflicted_fields = Vec::new();
    let mut field_scores = Vec::new();
    let mut consensus_ratios = Vec::new();
    let mut reliabilities = Vec::new();

    let mut apply = |name: &str,
                     selection: Option<FieldSelection>,
                     slot: &mut Option<FieldProposal>| {
        let Some(selection) = selection else {
            return;
        };
        if !selection.rejected.is_empty() {
            conflicted_fields.push(name.to_string());
        }
        field_scores.push(selection.score);
        consensus_ratios.push(selection.agreement);
        reliabilities.push(selection.winner.average_reliability());
        *slot = Some(FieldProposal {
            value: selection.winner.display.clone(),
            confidence: selection.score.clamp(0.0, 1.0),
            sources: selection.winner.sources.clone(),
            conflicts: selection
                .rejected
                .iter()
                .map(|candidate| candidate.display.clone())
                .collect(),
            reasoning: selection.reasoning,
        });
    };

    let total = group.len();
    let mut title_slot = None;
    apply("title", select_title(&group, options, reliability), &mut title_slot);
    let mut authors_slot = None;
    apply("authors", select_authors(&group, reliability), &mut authors_slot);
    let mut description_slot = None;
    apply(
        "description",
        select_simple(&group, options, reliability, ProviderField::Description, |r| {
            r.description.clone()
        }),
        &mut description_slot,
    );
    let mut publisher_slot = None;
    apply(
        "publisher",
        select_simple(&group, options, reliability, ProviderField::Publisher, |r| {
            r.publisher.clone()
        }),
        &mut publisher_slot,
    );
    let mut date_slot = None;
    apply("publication_date", select_date(&group, reliability), &mut date_slot);
    let mut language_slot = None;
    apply("language", select_language(&group, reliability), &mut language_slot);
    let mut pages_slot = None;
    apply("pages", select_pages(&group, reliability), &mut pages_slot);
    let mut isbn_slot = None;
    apply("isbn", select_isbn(&group, reliability), &mut isbn_slot);
    let mut series_slot = None;
    apply(
        "series",
        select_simple(&group, options, reliability, ProviderField::Series, |r| {
            r.series.clone()
        }),
        &mut series_slot,
    );
    let mut cover_slot = None;
    apply(
        "cover_url",
        select_simple(&group, options, reliability, ProviderField::CoverUrl, |r| {
            r.cover_url.clone()
        }),
        &mut cover_slot,
    );

    preview.title = title_slot;
    preview.authors = authors_slot;
    preview.description = description_slot;
    preview.publisher = publisher_slot;
    preview.publication_date = date_slot;
    preview.language = language_slot;
    preview.pages = pages_slot;
    preview.isbn = isbn_slot;
    preview.series = series_slot;
    preview.cover_url = cover_slot;
    preview.subjects = select_subjects(&group);

    let scored_fields = field_scores.len().max(1) as f64;
    let base =
        group.iter().map(|record| record.confidence).sum::<f64>() / total.max(1) as f64;
    let language_matches = options
        .preferred_language
        .as_deref()
        .map(|preferred| {
            group
                .iter()
                .filter(|record| {
                    record
                        .language
                        .as_deref()
                        .is_some_and(|lang| language::matches_preference(lang, preferred))
                })
                .count()
        })
        .unwrap_or(0);

    let inputs = ConfidenceInputs {
        base,
        consensus_ratio: consensus_ratios.iter().sum::<f64>() / scored_fields,
        agreement_ratio: 1.0 - conflicted_fields.len() as f64 / scored_fields,
        quality: field_scores.iter().sum::<f64>() / scored_fields,
        source_count: total,
        reliability: reliabilities.iter().sum::<f64>() / reliabilities.len().max(1) as f64,
        language_ratio: language_matches as f64 / total.max(1) as f64,
        disagreement_ratio: conflicted_fields.len() as f64 / scored_fields,
    };
    preview.confidence = confidence::aggregate(&inputs);

    let mut sources: Vec<String> = Vec::new();
    for record in &group {
        if !sources.contains(&record.source) {
            sources.push(record.source.clone());
        }
    }
    preview.summary = PreviewSummary {
        conflicted_fields,
        sources,
    };
    preview
}

/// Step 1: cluster records into "same work" groups and keep the cluster
/// maximising `count x average confidence`.
///
/// Two records describe the same work when their normalized titles agree
/// or their primary authors match; either link alone connects them, so a
/// translated title still clusters with its original through the author
/// and a disputed author still clusters through the shared title.
fn pick_work_group(records: &[MetadataRecord]) -> Vec<MetadataRecord> {
    if records.is_empty() {
        return Vec::new();
    }

    let keys: Vec<(String, Option<String>)> = records
        .iter()
        .map(|record| {
            let title_key = record
                .title
                .as_deref()
                .map(normalize_text)
                .unwrap_or_default();
            let primary_author = record.authors.first().cloned();
            (title_key, primary_author)
        })
        .collect();

    let mut cluster_of: Vec<usize> = (0..records.len()).collect();
    for i in 0..records.len() {
        for j in i + 1..records.len() {
            let titles_agree = !keys[i].0.is_empty() && keys[i].0 == keys[j].0;
            let authors_agree = match (&keys[i].1, &keys[j].1) {
                (Some(a), Some(b)) => authors::names_match(a, b),
                _ => false,
            };
            if titles_agree || authors_agree {
                let (from, to) = (cluster_of[j], cluster_of[i]);
                if from != to {
                    for slot in &mut cluster_of {
                        if *slot == from {
                            *slot = to;
                        }
                    }
                }
            }
        }
    }

    let mut clusters: HashMap<usize, Vec<MetadataRecord>> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        clusters
            .entry(cluster_of[index])
            .or_default()
            .push(record.clone());
    }

    clusters
        .into_values()
        .max_by(|a, b| {
            let weight_a = a.len() as f64 * average_confidence(a);
            let weight_b = b.len() as f64 * average_confidence(b);
            weight_a
                .partial_cmp(&weight_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_default()
}

fn average_confidence(records: &[MetadataRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(|record| record.confidence).sum::<f64>() / records.len() as f64
}

/// Lowercase, diacritics stripped, punctuation dropped, whitespace
/// collapsed.
fn normalize_text(value: &str) -> String {
    let stripped: String = value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn prefers(record: &MetadataRecord, options: &ReconcileOptions) -> bool {
    match (&options.preferred_language, &record.language) {
        (Some(preferred), Some(language)) => language::matches_preference(language, preferred),
        _ => false,
    }
}

fn select_simple(
    group: &[MetadataRecord],
    options: &ReconcileOptions,
    reliability: &dyn ReliabilitySource,
    field: ProviderField,
    extract: impl Fn(&MetadataRecord) -> Option<String>,
) -> Option<FieldSelection> {
    let inputs: Vec<FieldInput> = group
        .iter()
        .filter_map(|record| {
            let value = extract(record)?;
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return None;
            }
            Some(FieldInput {
                display: json!(trimmed),
                normalized: normalize_text(&trimmed),
                source: record.source.clone(),
                confidence: record.confidence,
                reliability: reliability.score(&record.source, field),
                preferred_language: prefers(record, options),
            })
        })
        .collect();
    fields::select(fields::group(inputs), group.len())
}

fn select_title(
    group: &[MetadataRecord],
    options: &ReconcileOptions,
    reliability: &dyn ReliabilitySource,
) -> Option<FieldSelection> {
    select_simple(group, options, reliability, ProviderField::Title, |record| {
        record.title.clone()
    })
}

fn select_authors(
    group: &[MetadataRecord],
    reliability: &dyn ReliabilitySource,
) -> Option<FieldSelection> {
    let inputs: Vec<FieldInput> = group
        .iter()
        .filter(|record| !record.authors.is_empty())
        .map(|record| {
            let displays: Vec<String> = record
                .authors
                .iter()
                .map(|author| authors::canonical_display(author))
                .collect();
            let mut keys: Vec<String> = record
                .authors
                .iter()
                .map(|author| authors::normalize(author))
                .collect();
            keys.sort();
            FieldInput {
                display: json!(displays),
                normalized: keys.join(";"),
                source: record.source.clone(),
                confidence: record.confidence,
                reliability: reliability.score(&record.source, ProviderField::Authors),
                preferred_language: false,
            }
        })
        .collect();
    fields::select(fields::group(inputs), group.len())
}

fn select_date(
    group: &[MetadataRecord],
    reliability: &dyn ReliabilitySource,
) -> Option<FieldSelection> {
    // Dates group by year; only differing years conflict. The displayed
    // value is the most precise date inside the winning year.
    let mut best_per_year: HashMap<i32, PartialDate> = HashMap::new();
    for record in group {
        let Some(date) = record.published.as_deref().and_then(PartialDate::parse) else {
            continue;
        };
        best_per_year
            .entry(date.year)
            .and_modify(|current| {
                if date.precision() > current.precision() {
                    *current = date;
                }
            })
            .or_insert(date);
    }

    let inputs: Vec<FieldInput> = group
        .iter()
        .filter_map(|record| {
            let date = record.published.as_deref().and_then(PartialDate::parse)?;
            let display = best_per_year.get(&date.year).copied().unwrap_or(date);
            Some(FieldInput {
                display: json!(display.to_iso()),
                normalized: date.year.to_string(),
                source: record.source.clone(),
                confidence: record.confidence,
                reliability: reliability.score(&record.source, ProviderField::PublicationDate),
                preferred_language: false,
            })
        })
        .collect();
    fields::select(fields::group(inputs), group.len())
}

fn select_language(
    group: &[MetadataRecord],
    reliability: &dyn ReliabilitySource,
) -> Option<FieldSelection> {
    let inputs: Vec<FieldInput> = group
        .iter()
        .filter_map(|record| {
            let raw = record.language.as_deref()?.trim();
            if raw.is_empty() {
                return None;
            }
            let normalized = language::normalize(raw);
            Some(FieldInput {
                display: json!(normalized.clone()),
                normalized,
                source: record.source.clone(),
                confidence: record.confidence,
                reliability: reliability.score(&record.source, ProviderField::Language),
                preferred_language: false,
            })
        })
        .collect();
    fields::select(fields::group(inputs), group.len())
}

fn select_pages(
    group: &[MetadataRecord],
    reliability: &dyn ReliabilitySource,
) -> Option<FieldSelection> {
    let inputs: Vec<FieldInput> = group
        .iter()
        .filter_map(|record| {
            let pages = record.pages.filter(|pages| *pages > 0)?;
            Some(FieldInput {
                display: json!(pages),
                normalized: pages.to_string(),
                source: record.source.clone(),
                confidence: record.confidence,
                reliability: reliability.score(&record.source, ProviderField::Pages),
                preferred_language: false,
            })
        })
        .collect();
    fields::select(fields::group(inputs), group.len())
}

/// Step 4, ISBN: invalid values surface as conflicts but are never chosen
/// over a valid one.
fn select_isbn(
    group: &[MetadataRecord],
    reliability: &dyn ReliabilitySource,
) -> Option<FieldSelection> {
    let mut inputs = Vec::new();
    let mut invalid = Vec::new();
    for record in group {
        let Some(raw) = record.isbn.as_deref() else {
            continue;
        };
        match isbn::normalize(raw) {
            Some(normalized) => inputs.push(FieldInput {
                display: json!(normalized.clone()),
                normalized,
                source: record.source.clone(),
                confidence: record.confidence,
                reliability: reliability.score(&record.source, ProviderField::Isbn),
                preferred_language: false,
            }),
            None => {
                let cleaned = isbn::clean(raw);
                if !cleaned.is_empty() {
                    invalid.push(json!(cleaned));
                }
            }
        }
    }

    let mut selection = fields::select(fields::group(inputs), group.len())?;
    for value in invalid {
        if !selection.conflicts_contain(&value) {
            selection.push_conflict(value);
        }
    }
    Some(selection)
}

fn select_subjects(group: &[MetadataRecord]) -> Option<FieldProposal> {
    let inputs: Vec<SubjectInput> = group
        .iter()
        .flat_map(|record| {
            let scheme = match record
                .provider_data
                .get("subject_scheme")
                .and_then(Value::as_str)
            {
                Some("lcsh") => SubjectScheme::Lcsh,
                _ => SubjectScheme::FreeText,
            };
            record.subjects.iter().map(move |subject| SubjectInput {
                value: subject.clone(),
                scheme,
                source: record.source.clone(),
            })
        })
        .collect();
    if inputs.is_empty() {
        return None;
    }

    let contributing: Vec<&MetadataRecord> = group
        .iter()
        .filter(|record| !record.subjects.is_empty())
        .collect();
    let confidence = contributing
        .iter()
        .map(|record| record.confidence)
        .sum::<f64>()
        / contributing.len().max(1) as f64;

    let (values, sources) = subjects::reconcile(&inputs);
    if values.is_empty() {
        return None;
    }
    Some(FieldProposal {
        value: json!(values),
        confidence,
        sources,
        conflicts: Vec::new(),
        reasoning: format!("merged from {} source(s)", contributing.len()),
    })
}

impl FieldSelection {
    fn conflicts_contain(&self, value: &Value) -> bool {
        self.rejected
            .iter()
            .any(|candidate| &candidate.display == value)
    }

    fn push_conflict(&mut self, value: Value) {
        self.rejected.push(fields::CandidateValue {
            display: value,
            normalized: String::new(),
            sources: Vec::new(),
            source_count: 0,
            total_confidence: 0.0,
            preferred_language_count: 0,
            reliability_sum: 0.0,
        });
    }
}
