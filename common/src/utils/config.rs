use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
    S3,
}

/// How an ingest reacts to an edition whose ISBN already exists.
#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    Prompt,
    Skip,
    CreateEdition,
}

/// Provider cache eviction strategies.
#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    #[default]
    Lru,
    Lfu,
    Fifo,
    Ttl,
}

#[derive(Clone, Deserialize, Debug)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default)]
    pub s3: Option<S3Config>,
    /// Presigned upload URL lifetime.
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
    #[serde(default)]
    pub on_duplicate_edition: DuplicatePolicy,
    /// Provider names enabled for enrichment, in priority order.
    #[serde(default = "default_enabled_providers")]
    pub enabled_providers: Vec<String>,
    /// Preferred metadata language (ISO 639 or MARC code), if any.
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default = "default_provider_global_timeout_ms")]
    pub provider_global_timeout_ms: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// Unbounded when absent.
    #[serde(default)]
    pub provider_max_concurrency: Option<usize>,
    #[serde(default = "default_true")]
    pub provider_continue_on_failure: bool,
    #[serde(default = "default_provider_retry_attempts")]
    pub provider_retry_attempts: usize,
    #[serde(default = "default_cache_max_entries")]
    pub provider_cache_max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub provider_cache_ttl_secs: u64,
    #[serde(default = "default_cache_cleanup_secs")]
    pub provider_cache_cleanup_secs: u64,
    #[serde(default)]
    pub provider_cache_eviction: EvictionKind,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

fn default_presign_expiry_secs() -> u64 {
    3600
}

fn default_enabled_providers() -> Vec<String> {
    vec!["openlibrary".to_string(), "googlebooks".to_string()]
}

fn default_provider_global_timeout_ms() -> u64 {
    30_000
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_provider_retry_attempts() -> usize {
    3
}

fn default_cache_max_entries() -> usize {
    500
}

fn default_cache_ttl_secs() -> u64 {
    900
}

fn default_cache_cleanup_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            http_port: 0,
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            s3: None,
            presign_expiry_secs: default_presign_expiry_secs(),
            on_duplicate_edition: DuplicatePolicy::default(),
            enabled_providers: default_enabled_providers(),
            preferred_language: None,
            provider_global_timeout_ms: default_provider_global_timeout_ms(),
            provider_timeout_ms: default_provider_timeout_ms(),
            provider_max_concurrency: None,
            provider_continue_on_failure: true,
            provider_retry_attempts: default_provider_retry_attempts(),
            provider_cache_max_entries: default_cache_max_entries(),
            provider_cache_ttl_secs: default_cache_ttl_secs(),
            provider_cache_cleanup_secs: default_cache_cleanup_secs(),
            provider_cache_eviction: EvictionKind::default(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_the_tuning_knobs() {
        let config = AppConfig::default();
        assert_eq!(config.presign_expiry_secs, 3600);
        assert_eq!(config.provider_global_timeout_ms, 30_000);
        assert_eq!(config.provider_timeout_ms, 10_000);
        assert_eq!(config.provider_max_concurrency, None);
        assert!(config.provider_continue_on_failure);
        assert_eq!(config.on_duplicate_edition, DuplicatePolicy::Prompt);
        assert_eq!(config.provider_cache_eviction, EvictionKind::Lru);
        assert_eq!(config.enabled_providers, vec!["openlibrary", "googlebooks"]);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::from_str::<DuplicatePolicy>("\"create-edition\"").unwrap(),
            DuplicatePolicy::CreateEdition
        );
        assert_eq!(
            serde_json::from_str::<EvictionKind>("\"lfu\"").unwrap(),
            EvictionKind::Lfu
        );
        assert_eq!(
            serde_json::from_str::<StorageKind>("\"s3\"").unwrap(),
            StorageKind::S3
        );
    }
}
