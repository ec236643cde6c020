use std::{ops::Deref, sync::Arc};

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the indexes the library schema relies on. Safe to run on
    /// every startup; definitions are idempotent.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_asset_checksum ON asset FIELDS checksum UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_edition_work ON edition FIELDS work_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_edition_isbn13 ON edition FIELDS isbn_13")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_edition_isbn10 ON edition FIELDS isbn_10")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_work_title_key ON work FIELDS title_key")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_contributor_work ON contributor FIELDS work_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_pending_user ON pending_ingest FIELDS user_id")
            .await?;
        // SurrealDB has no partial unique indexes; the one-pending-per-work
        // rule is enforced by the enrichment upsert on top of this lookup.
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_enrichment_pending ON enrichment_result FIELDS work_id, status",
            )
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_user_api_key ON user FIELDS api_key UNIQUE")
            .await?;

        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Stores an object under its own id.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory client for tests, isolated per namespace/database pair.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized()
            .await
            .expect("Failed to define indexes");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_unique_checksum_index_rejects_duplicates() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");

        db.query("CREATE asset:one SET checksum = 'abc', size = 1")
            .await
            .expect("first insert");
        let mut second = db
            .query("CREATE asset:two SET checksum = 'abc', size = 2")
            .await
            .expect("query ran");
        let result: Result<Vec<serde_json::Value>, _> = second.take(0);
        assert!(result.is_err(), "duplicate checksum should be rejected");
    }
}
