use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Work, "work", {
    created_by: String,
    title: Option<String>,
    /// Case- and diacritic-insensitive lookup key derived from `title`.
    title_key: Option<String>,
    isbn_10: Option<String>,
    isbn_13: Option<String>,
    language: Option<String>,
    pages: Option<u32>,
    synopsis: Option<String>,
    /// Publication date, ISO-formatted to its known precision
    /// (`2020`, `2020-05` or `2020-05-01`).
    published_at: Option<String>
});

impl Work {
    pub fn new(created_by: &str, title: Option<String>) -> Self {
        let now = Utc::now();
        let title_key = title.as_deref().map(Self::title_key_of);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            created_by: created_by.to_string(),
            title,
            title_key,
            isbn_10: None,
            isbn_13: None,
            language: None,
            pages: None,
            synopsis: None,
            published_at: None,
        }
    }

    /// Lowercased, diacritic-stripped, whitespace-collapsed title key.
    pub fn title_key_of(title: &str) -> String {
        let stripped: String = title
            .nfd()
            .filter(|c| !is_combining_mark(*c))
            .collect::<String>()
            .to_lowercase();
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn has_isbn(&self) -> bool {
        self.isbn_10.is_some() || self.isbn_13.is_some()
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Work, AppError> {
        db.get_item::<Work>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("work {id}")))
    }

    /// Works whose normalized title equals the given one.
    pub async fn find_by_title_key(
        title_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Work>, AppError> {
        let mut response = db
            .query("SELECT * FROM work WHERE title_key = $title_key")
            .bind(("title_key", title_key.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Works carrying the given ISBN in either form.
    pub async fn find_by_isbn(isbn: &str, db: &SurrealDbClient) -> Result<Vec<Work>, AppError> {
        let mut response = db
            .query("SELECT * FROM work WHERE isbn_13 = $isbn OR isbn_10 = $isbn")
            .bind(("isbn", isbn.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_key_normalization() {
        assert_eq!(
            Work::title_key_of("Die  Vermessung   der Welt"),
            "die vermessung der welt"
        );
        assert_eq!(Work::title_key_of("Cien Años de Soledad"), "cien anos de soledad");
    }

    #[test]
    fn test_new_derives_title_key() {
        let work = Work::new("user-1", Some("École du Soir".into()));
        assert_eq!(work.title_key.as_deref(), Some("ecole du soir"));
        assert!(!work.has_isbn());
    }

    #[tokio::test]
    async fn test_title_and_isbn_lookups() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");

        let mut work = Work::new("user-1", Some("Die Vermessung der Welt".into()));
        work.isbn_13 = Some("9783446274860".into());
        db.store_item(work.clone()).await.expect("store");

        let by_title = Work::find_by_title_key("die vermessung der welt", &db)
            .await
            .expect("query");
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, work.id);

        let by_isbn = Work::find_by_isbn("9783446274860", &db).await.expect("query");
        assert_eq!(by_isbn.len(), 1);

        let none = Work::find_by_isbn("9780000000000", &db).await.expect("query");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_not_found_maps_to_app_error() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        assert!(matches!(
            Work::get_by_id("nope", &db).await,
            Err(AppError::NotFound(_))
        ));
    }
}
