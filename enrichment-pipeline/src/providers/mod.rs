pub mod google_books;
pub mod open_library;

use std::sync::Arc;

use tracing::warn;

use common::utils::config::AppConfig;

use crate::provider::{MetadataProvider, ProviderError};

pub use google_books::GoogleBooksProvider;
pub use open_library::OpenLibraryProvider;

/// Builds the enabled provider set from configuration, preserving the
/// configured order. Unknown names are skipped with a warning so one typo
/// does not take the whole registry down.
pub fn registry_from_config(
    cfg: &AppConfig,
) -> Result<Vec<Arc<dyn MetadataProvider>>, ProviderError> {
    let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();
    for name in &cfg.enabled_providers {
        match name.as_str() {
            "openlibrary" => providers.push(Arc::new(OpenLibraryProvider::new()?)),
            "googlebooks" => providers.push(Arc::new(GoogleBooksProvider::new()?)),
            other => warn!(provider = other, "unknown provider in config; skipping"),
        }
    }
    Ok(providers)
}
