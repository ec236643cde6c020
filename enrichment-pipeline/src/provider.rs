use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use common::metadata::MetadataRecord;

use crate::query::ProviderQuery;

/// The standardized record fields a provider can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderField {
    Title,
    Authors,
    Isbn,
    PublicationDate,
    Publisher,
    Subjects,
    Language,
    Pages,
    Description,
    CoverUrl,
    Series,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub request_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(10),
            request_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub request_timeout: Duration,
    pub operation_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(8),
            operation_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response decoding failed: {0}")]
    Decode(String),

    #[error("Cancelled by deadline")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures are worth retrying: network errors, timeouts,
    /// 429s and server-side 5xx. Other 4xx responses are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Http { status } => *status >= 500,
            Self::Decode(_) | Self::Cancelled => false,
        }
    }

    /// Stable kind label reported in per-provider status rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::RateLimited { .. } => "rate-limited",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(Duration::ZERO);
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return Self::RateLimited { retry_after: None };
            }
            return Self::Http {
                status: status.as_u16(),
            };
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Network(err.to_string())
    }
}

/// One external bibliographic source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Lower numbers fan out first when concurrency is bounded.
    fn priority(&self) -> u8 {
        50
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::default()
    }

    fn supports(&self, field: ProviderField) -> bool;

    /// How trustworthy this source is for a given field, in `[0, 1]`.
    fn reliability(&self, field: ProviderField) -> f64;

    async fn search_by_title(
        &self,
        title: &str,
        query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError>;

    async fn search_by_isbn(&self, isbn: &str) -> Result<Vec<MetadataRecord>, ProviderError>;

    async fn search_by_creator(
        &self,
        creator: &str,
        query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError>;

    /// Routes a multi-criteria query to the most discriminative search:
    /// ISBN is an exact key, creator searches beat fuzzy title matches.
    async fn search_multi_criteria(
        &self,
        query: &ProviderQuery,
    ) -> Result<Vec<MetadataRecord>, ProviderError> {
        if let Some(isbn) = &query.isbn {
            return self.search_by_isbn(isbn).await;
        }
        if let Some(creator) = query.authors.first() {
            return self.search_by_creator(creator, query).await;
        }
        if let Some(title) = &query.title {
            return self.search_by_title(title, query).await;
        }
        Ok(Vec::new())
    }
}
