use serde::{Deserialize, Serialize};

/// One logical bibliographic query, fanned out to every enabled provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuery {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub language: Option<String>,
    pub subjects: Vec<String>,
    pub publisher: Option<String>,
    pub year_range: Option<(i32, i32)>,
    pub fuzzy: bool,
}

impl ProviderQuery {
    pub fn by_isbn(isbn: impl Into<String>) -> Self {
        Self {
            isbn: Some(isbn.into()),
            ..Self::default()
        }
    }

    pub fn by_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.authors.is_empty()
            && self.isbn.is_none()
            && self.publisher.is_none()
            && self.subjects.is_empty()
    }

    /// Canonical cache key: every criterion in a fixed order, scoped to one
    /// provider.
    pub fn cache_key(&self, provider: &str) -> String {
        let year_range = self
            .year_range
            .map(|(from, to)| format!("{from}-{to}"))
            .unwrap_or_default();
        format!(
            "{provider}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.title.as_deref().unwrap_or_default(),
            self.authors.join(","),
            self.isbn.as_deref().unwrap_or_default(),
            self.language.as_deref().unwrap_or_default(),
            self.subjects.join(","),
            self.publisher.as_deref().unwrap_or_default(),
            year_range,
            self.fuzzy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_stable_and_provider_scoped() {
        let query = ProviderQuery {
            title: Some("Beloved".into()),
            authors: vec!["Toni Morrison".into()],
            language: Some("en".into()),
            year_range: Some((1987, 1990)),
            ..ProviderQuery::default()
        };
        let key = query.cache_key("openlibrary");
        assert_eq!(key, "openlibrary|Beloved|Toni Morrison||en|||1987-1990|false");
        assert_ne!(key, query.cache_key("googlebooks"));
        assert_eq!(key, query.clone().cache_key("openlibrary"));
    }

    #[test]
    fn test_criteria_changes_change_the_key() {
        let base = ProviderQuery::by_title("Beloved");
        let mut fuzzy = base.clone();
        fuzzy.fuzzy = true;
        assert_ne!(base.cache_key("p"), fuzzy.cache_key("p"));
    }

    #[test]
    fn test_is_empty() {
        assert!(ProviderQuery::default().is_empty());
        assert!(!ProviderQuery::by_isbn("9780123456786").is_empty());
        // Language alone is a filter, not a criterion.
        let lang_only = ProviderQuery {
            language: Some("de".into()),
            ..ProviderQuery::default()
        };
        assert!(lang_only.is_empty());
    }
}
