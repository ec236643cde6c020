use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Edition, "edition", {
    work_id: String,
    title: String,
    synopsis: Option<String>,
    language: Option<String>,
    pages: Option<u32>,
    sorting_key: String,
    legal_information: Option<String>,
    isbn_10: Option<String>,
    isbn_13: Option<String>,
    /// Asset backing this edition's file.
    asset_id: String
});

impl Edition {
    /// A new edition of a work; the sorting key defaults to the title.
    pub fn new(work_id: &str, title: String, asset_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            work_id: work_id.to_string(),
            sorting_key: title.clone(),
            title,
            synopsis: None,
            language: None,
            pages: None,
            legal_information: None,
            isbn_10: None,
            isbn_13: None,
            asset_id: asset_id.to_string(),
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Edition, AppError> {
        db.get_item::<Edition>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("edition {id}")))
    }

    pub async fn list_for_work(
        work_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Edition>, AppError> {
        let mut response = db
            .query("SELECT * FROM edition WHERE work_id = $work_id ORDER BY sorting_key ASC")
            .bind(("work_id", work_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Editions carrying the given ISBN in either form.
    pub async fn find_by_isbn(isbn: &str, db: &SurrealDbClient) -> Result<Vec<Edition>, AppError> {
        let mut response = db
            .query("SELECT * FROM edition WHERE isbn_13 = $isbn OR isbn_10 = $isbn")
            .bind(("isbn", isbn.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}
