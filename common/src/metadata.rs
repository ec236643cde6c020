use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One provider's answer for a bibliographic query.
///
/// The standardized fields are all optional; anything a provider returns
/// beyond them travels untyped in `provider_data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub id: String,
    pub source: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_data: Map<String, Value>,
}

impl MetadataRecord {
    /// Confidence is clamped into `[0, 1]` at construction.
    pub fn new(source: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            title: None,
            authors: Vec::new(),
            isbn: None,
            published: None,
            subjects: Vec::new(),
            publisher: None,
            pages: None,
            language: None,
            cover_url: None,
            series: None,
            description: None,
            provider_data: Map::new(),
        }
    }
}

/// A reconciled value for one preview field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldProposal {
    pub value: Value,
    pub confidence: f64,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Value>,
    pub reasoning: String,
}

impl FieldProposal {
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreviewSummary {
    pub conflicted_fields: Vec<String>,
    pub sources: Vec<String>,
}

/// The reconciled candidate shown to the user before anything is written.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<FieldProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<FieldProposal>,
    /// Aggregated confidence across the whole preview.
    pub confidence: f64,
    #[serde(default)]
    pub summary: PreviewSummary,
}

/// Field names as they appear in previews, improvements and apply requests.
pub const PREVIEW_FIELDS: [&str; 11] = [
    "title",
    "authors",
    "description",
    "publisher",
    "publication_date",
    "language",
    "pages",
    "isbn",
    "subjects",
    "series",
    "cover_url",
];

impl Preview {
    pub fn field(&self, name: &str) -> Option<&FieldProposal> {
        match name {
            "title" => self.title.as_ref(),
            "authors" => self.authors.as_ref(),
            "description" => self.description.as_ref(),
            "publisher" => self.publisher.as_ref(),
            "publication_date" => self.publication_date.as_ref(),
            "language" => self.language.as_ref(),
            "pages" => self.pages.as_ref(),
            "isbn" => self.isbn.as_ref(),
            "subjects" => self.subjects.as_ref(),
            "series" => self.series.as_ref(),
            "cover_url" => self.cover_url.as_ref(),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldProposal)> {
        PREVIEW_FIELDS
            .iter()
            .filter_map(|name| self.field(name).map(|proposal| (*name, proposal)))
    }
}

/// Confidence tiers over the aggregated preview score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Exceptional,
    Strong,
    Good,
    Moderate,
    Weak,
    Poor,
}

impl ConfidenceTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            Self::Exceptional
        } else if score >= 0.90 {
            Self::Strong
        } else if score >= 0.70 {
            Self::Good
        } else if score >= 0.50 {
            Self::Moderate
        } else if score >= 0.30 {
            Self::Weak
        } else {
            Self::Poor
        }
    }
}

/// One field the enrichment proposes to fill in on the work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldImprovement {
    pub field: String,
    pub value: Value,
    pub confidence: f64,
    pub sources: Vec<String>,
}
