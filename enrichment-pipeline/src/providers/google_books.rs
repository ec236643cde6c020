use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use common::metadata::MetadataRecord;

use crate::provider::{
    MetadataProvider, ProviderError, ProviderField, RateLimitConfig, TimeoutConfig,
};
use crate::query::ProviderQuery;

const BASE_URL: &str = "https://www.googleapis.com/books/v1";
const SEARCH_LIMIT: usize = 5;
const SEARCH_CONFIDENCE: f64 = 0.75;
const ISBN_CONFIDENCE: f64 = 0.88;

/// Google Books volumes API. Categories are free text, not a controlled
/// vocabulary.
pub struct GoogleBooksProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    id: Option<String>,
    #[serde(rename = "volumeInfo")]
    volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "industryIdentifiers", default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    #[serde(rename = "pageCount")]
    page_count: Option<u32>,
    #[serde(default)]
    categories: Vec<String>,
    language: Option<String>,
    #[serde(rename = "imageLinks")]
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct ImageLinks {
    thumbnail: Option<String>,
}

impl GoogleBooksProvider {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, ProviderError> {
        let timeouts = TimeoutConfig::default();
        let client = reqwest::Client::builder()
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .timeout(timeouts.request_timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn volumes(&self, q: String, confidence: f64) -> Result<Vec<MetadataRecord>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/volumes", self.base_url))
            .query(&[("q", q), ("maxResults", SEARCH_LIMIT.to_string())])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited { retry_after: None });
        }
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
            });
        }

        let body: VolumesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(body
            .items
            .into_iter()
            .map(|volume| map_volume(volume, confidence))
            .collect())
    }
}

fn map_volume(volume: Volume, confidence: f64) -> MetadataRecord {
    let info = volume.volume_info;
    let mut record = MetadataRecord::new("googlebooks", confidence);
    record.title = info.title;
    record.authors = info.authors;
    record.publisher = info.publisher;
    record.published = info.published_date;
    record.description = info.description;
    record.isbn = pick_isbn(&info.industry_identifiers);
    record.pages = info.page_count.filter(|pages| *pages > 0);
    record.subjects = info.categories;
    record.language = info.language;
    record.cover_url = info.image_links.and_then(|links| links.thumbnail);
    if let Some(id) = volume.id {
        record.provider_data.insert("googlebooks_id".into(), json!(id));
    }
    record
}

/// ISBN-13 preferred over ISBN-10; anything else is ignored.
fn pick_isbn(identifiers: &[IndustryIdentifier]) -> Option<String> {
    identifiers
        .iter()
        .find(|identifier| identifier.kind == "ISBN_13")
        .or_else(|| {
            identifiers
                .iter()
                .find(|identifier| identifier.kind == "ISBN_10")
        })
        .map(|identifier| identifier.identifier.clone())
}

#[async_trait]
impl MetadataProvider for GoogleBooksProvider {
    fn name(&self) -> &str {
        "googlebooks"
    }

    fn priority(&self) -> u8 {
        50
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: 100,
            window: std::time::Duration::from_secs(60),
            request_delay: std::time::Duration::from_millis(100),
        }
    }

    fn supports(&self, field: ProviderField) -> bool {
        !matches!(field, ProviderField::Series)
    }

    fn reliability(&self, field: ProviderField) -> f64 {
        match field {
            ProviderField::Isbn => 0.95,
            ProviderField::Title => 0.9,
            ProviderField::Authors | ProviderField::Description | ProviderField::Language
            | ProviderField::Pages | ProviderField::CoverUrl => 0.85,
            ProviderField::Publisher | ProviderField::PublicationDate => 0.8,
            ProviderField::Subjects => 0.6,
            ProviderField::Series => 0.0,
        }
    }

    async fn search_by_title(
        &self,
        title: &str,
        _query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        self.volumes(format!("intitle:{title}"), SEARCH_CONFIDENCE)
            .await
    }

    async fn search_by_isbn(&self, isbn: &str) -> Result<Vec<MetadataRecord>, ProviderError> {
        let cleaned = crate::reconcile::isbn::clean(isbn);
        self.volumes(format!("isbn:{cleaned}"), ISBN_CONFIDENCE).await
    }

    async fn search_by_creator(
        &self,
        creator: &str,
        query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        let q = match &query.title {
            Some(title) => format!("intitle:{title}+inauthor:{creator}"),
            None => format!("inauthor:{creator}"),
        };
        self.volumes(q, SEARCH_CONFIDENCE).await
    }
}
