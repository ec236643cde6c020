use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use common::error::AppError;
use common::metadata::MetadataRecord;
use common::utils::config::AppConfig;

use crate::cache::ProviderCache;
use crate::provider::{MetadataProvider, ProviderError};
use crate::query::ProviderQuery;
use crate::rate_limit::RateLimiter;
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub global_timeout: Duration,
    pub provider_timeout: Duration,
    /// Unbounded when `None`.
    pub max_concurrency: Option<usize>,
    pub continue_on_failure: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            global_timeout: Duration::from_secs(30),
            provider_timeout: Duration::from_secs(10),
            max_concurrency: None,
            continue_on_failure: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            global_timeout: Duration::from_millis(cfg.provider_global_timeout_ms),
            provider_timeout: Duration::from_millis(cfg.provider_timeout_ms),
            max_concurrency: cfg.provider_max_concurrency,
            continue_on_failure: cfg.provider_continue_on_failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Succeeded,
    Failed,
}

/// Per-provider result row for one coordinated query.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOutcome {
    pub name: String,
    pub status: ProviderStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub records: usize,
}

#[derive(Debug)]
pub struct CoordinatorResult {
    /// Order is not stable across runs; callers must not depend on it.
    pub aggregated_records: Vec<MetadataRecord>,
    pub per_provider: Vec<ProviderOutcome>,
    pub successful: usize,
    pub failed: usize,
    pub total_records: usize,
}

/// Fans one query out to every enabled provider under concurrency and
/// deadline bounds, aggregating whatever arrives in time.
pub struct ProviderCoordinator {
    providers: Vec<Arc<dyn MetadataProvider>>,
    limiters: HashMap<String, Arc<RateLimiter>>,
    cache: Arc<ProviderCache>,
    retry: RetryPolicy,
    config: CoordinatorConfig,
}

impl ProviderCoordinator {
    pub fn new(
        providers: Vec<Arc<dyn MetadataProvider>>,
        cache: Arc<ProviderCache>,
        config: CoordinatorConfig,
        retry: RetryPolicy,
    ) -> Self {
        let limiters = providers
            .iter()
            .map(|provider| {
                (
                    provider.name().to_string(),
                    Arc::new(RateLimiter::new(provider.rate_limit())),
                )
            })
            .collect();
        Self {
            providers,
            limiters,
            cache,
            retry,
            config,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    pub fn providers(&self) -> &[Arc<dyn MetadataProvider>] {
        &self.providers
    }

    #[instrument(skip_all, fields(providers = self.providers.len()))]
    pub async fn search(&self, query: &ProviderQuery) -> Result<CoordinatorResult, AppError> {
        let deadline = Instant::now() + self.config.global_timeout;
        let concurrency = self
            .config
            .max_concurrency
            .unwrap_or(self.providers.len())
            .max(1);

        let futures: Vec<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                Box::pin(async move { self.run_provider(provider, query, deadline).await })
            })
            .collect();
        let outcomes: Vec<(ProviderOutcome, Vec<MetadataRecord>)> = stream::iter(futures)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut per_provider = Vec::with_capacity(outcomes.len());
        let mut aggregated_records = Vec::new();
        let mut seen_ids = HashSet::new();
        for (outcome, records) in outcomes {
            per_provider.push(outcome);
            for record in records {
                // Identical ids inside one query are duplicates.
                if seen_ids.insert(record.id.clone()) {
                    aggregated_records.push(record);
                }
            }
        }

        let successful = per_provider
            .iter()
            .filter(|outcome| outcome.status == ProviderStatus::Succeeded)
            .count();
        let failed = per_provider.len() - successful;

        if !self.config.continue_on_failure && failed > 0 {
            let failures: Vec<&str> = per_provider
                .iter()
                .filter(|outcome| outcome.status == ProviderStatus::Failed)
                .map(|outcome| outcome.name.as_str())
                .collect();
            return Err(AppError::Processing(format!(
                "provider query failed for: {}",
                failures.join(", ")
            )));
        }

        let total_records = aggregated_records.len();
        debug!(
            successful,
            failed, total_records, "provider fan-out completed"
        );
        Ok(CoordinatorResult {
            aggregated_records,
            per_provider,
            successful,
            failed,
            total_records,
        })
    }

    async fn run_provider(
        &self,
        provider: Arc<dyn MetadataProvider>,
        query: &ProviderQuery,
        deadline: Instant,
    ) -> (ProviderOutcome, Vec<MetadataRecord>) {
        let name = provider.name().to_string();
        let started = Instant::now();

        let cache_key = query.cache_key(&name);
        if let Some(records) = self.cache.get(&cache_key).await {
            debug!(provider = %name, records = records.len(), "provider cache hit");
            let outcome = ProviderOutcome {
                name,
                status: ProviderStatus::Succeeded,
                duration_ms: elapsed_ms(started),
                error_kind: None,
                records: records.len(),
            };
            return (outcome, records);
        }

        // Each call gets whatever is smaller: its own budget or what is
        // left of the global one.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = self.config.provider_timeout.min(remaining);
        if budget.is_zero() {
            return (
                failed_outcome(name, started, &ProviderError::Cancelled),
                Vec::new(),
            );
        }

        let limiter = self.limiters.get(&name).cloned();
        let attempt = tokio::time::timeout(budget, async {
            if let Some(limiter) = &limiter {
                limiter.acquire().await;
            }
            with_retry(&self.retry, &name, || provider.search_multi_criteria(query)).await
        })
        .await;

        match attempt {
            Ok(Ok(records)) => {
                self.cache.set(&cache_key, records.clone()).await;
                let outcome = ProviderOutcome {
                    name,
                    status: ProviderStatus::Succeeded,
                    duration_ms: elapsed_ms(started),
                    error_kind: None,
                    records: records.len(),
                };
                (outcome, records)
            }
            Ok(Err(error)) => {
                warn!(provider = %name, error = %error, "provider query failed");
                (failed_outcome(name, started, &error), Vec::new())
            }
            Err(_elapsed) => {
                // A cancelled provider never contributes partial records.
                let error = if remaining < self.config.provider_timeout {
                    ProviderError::Cancelled
                } else {
                    ProviderError::Timeout(budget)
                };
                warn!(provider = %name, error = %error, "provider deadline expired");
                (failed_outcome(name, started, &error), Vec::new())
            }
        }
    }
}

fn failed_outcome(name: String, started: Instant, error: &ProviderError) -> ProviderOutcome {
    ProviderOutcome {
        name,
        status: ProviderStatus::Failed,
        duration_ms: elapsed_ms(started),
        error_kind: Some(error.kind().to_string()),
        records: 0,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
