use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use common::metadata::MetadataRecord;

use crate::provider::{
    MetadataProvider, ProviderError, ProviderField, RateLimitConfig, TimeoutConfig,
};
use crate::query::ProviderQuery;

const BASE_URL: &str = "https://openlibrary.org";
const COVERS_URL: &str = "https://covers.openlibrary.org";
const SEARCH_LIMIT: usize = 5;
/// Search hits are fuzzier than direct ISBN resolution.
const SEARCH_CONFIDENCE: f64 = 0.72;
const ISBN_CONFIDENCE: f64 = 0.85;

/// Open Library (openlibrary.org). Subject headings follow LCSH, which
/// the reconciler prefers over free-text subjects.
pub struct OpenLibraryProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchDoc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    first_publish_year: Option<i32>,
    #[serde(default)]
    isbn: Vec<String>,
    #[serde(default)]
    language: Vec<String>,
    #[serde(default)]
    publisher: Vec<String>,
    #[serde(default)]
    subject: Vec<String>,
    number_of_pages_median: Option<u32>,
    cover_i: Option<i64>,
    key: Option<String>,
}

impl OpenLibraryProvider {
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

    async fn search(&self, params: &[(&str, String)]) -> Result<Vec<MetadataRecord>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/search.json", self.base_url))
            .query(params)
            .query(&[("limit", SEARCH_LIMIT.to_string())])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let response = check_status(response)?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(body
            .docs
            .into_iter()
            .map(|doc| map_doc(doc, SEARCH_CONFIDENCE))
            .collect())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(ProviderError::Http {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

fn map_doc(doc: SearchDoc, confidence: f64) -> MetadataRecord {
    let mut record = MetadataRecord::new("openlibrary", confidence);
    record.title = doc.title;
    record.authors = doc.author_name;
    record.published = doc.first_publish_year.map(|year| year.to_string());
    record.isbn = doc
        .isbn
        .iter()
        .find(|candidate| crate::reconcile::isbn::normalize(candidate).is_some())
        .cloned()
        .or_else(|| doc.isbn.first().cloned());
    record.language = doc.language.first().cloned();
    record.publisher = doc.publisher.first().cloned();
    record.subjects = doc.subject;
    record.pages = doc.number_of_pages_median;
    record.cover_url = doc
        .cover_i
        .map(|id| format!("{COVERS_URL}/b/id/{id}-L.jpg"));
    record
        .provider_data
        .insert("subject_scheme".into(), json!("lcsh"));
    if let Some(key) = doc.key {
        record.provider_data.insert("openlibrary_key".into(), json!(key));
    }
    record
}

#[async_trait]
impl MetadataProvider for OpenLibraryProvider {
    fn name(&self) -> &str {
        "openlibrary"
    }

    fn priority(&self) -> u8 {
        40
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: 50,
            window: std::time::Duration::from_secs(60),
            request_delay: std::time::Duration::from_millis(200),
        }
    }

    fn supports(&self, field: ProviderField) -> bool {
        !matches!(field, ProviderField::Series)
    }

    fn reliability(&self, field: ProviderField) -> f64 {
        match field {
            ProviderField::Isbn => 0.9,
            ProviderField::Title => 0.85,
            ProviderField::Authors | ProviderField::Subjects | ProviderField::CoverUrl => 0.8,
            ProviderField::PublicationDate | ProviderField::Language => 0.75,
            ProviderField::Publisher | ProviderField::Pages => 0.7,
            ProviderField::Description => 0.6,
            ProviderField::Series => 0.0,
        }
    }

    async fn search_by_title(
        &self,
        title: &str,
        query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        let mut params = vec![("title", title.to_string())];
        if let Some(language) = &query.language {
            params.push(("lang", language.clone()));
        }
        self.search(&params).await
    }

    async fn search_by_isbn(&self, isbn: &str) -> Result<Vec<MetadataRecord>, ProviderError> {
        let cleaned = crate::reconcile::isbn::clean(isbn);
        let mut records = self.search(&[("isbn", cleaned)]).await?;
        for record in &mut records {
            record.confidence = ISBN_CONFIDENCE;
        }
        Ok(records)
    }

    async fn search_by_creator(
        &self,
        creator: &str,
        query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        let mut params = vec![("author", creator.to_string())];
        if let Some(title) = &query.title {
            params.push(("title", title.clone()));
        }
        self.search(&params).await
    }
}
