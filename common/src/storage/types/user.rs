use uuid::Uuid;

use crate::{error::AppError, scopes::Scope, storage::db::SurrealDbClient, stored_object};

stored_object!(User, "user", {
    name: String,
    api_key: Option<String>,
    scopes: Vec<Scope>
});

impl User {
    pub fn new(name: &str, scopes: Vec<Scope>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name: name.to_string(),
            api_key: Some(format!("lib_{}", Uuid::new_v4().simple())),
            scopes,
        }
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<User>, AppError> {
        let mut response = db
            .query("SELECT * FROM user WHERE api_key = $api_key LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?;
        let users: Vec<User> = response.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Scopes usable over an API key: the instance scopes never apply.
    pub fn api_key_scopes(&self) -> Vec<Scope> {
        self.scopes
            .iter()
            .copied()
            .filter(|scope| scope.api_key_allowed())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_key_lookup() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let user = User::new("alice", vec![Scope::LibraryWrite]);
        let api_key = user.api_key.clone().expect("generated key");
        db.store_item(user.clone()).await.expect("store");

        let found = User::find_by_api_key(&api_key, &db).await.expect("query");
        assert_eq!(found.map(|u| u.id), Some(user.id));

        let missing = User::find_by_api_key("lib_nope", &db).await.expect("query");
        assert!(missing.is_none());
    }

    #[test]
    fn test_instance_scopes_never_flow_through_api_keys() {
        let user = User::new(
            "ops",
            vec![Scope::InstanceWrite, Scope::LibraryRead, Scope::Admin],
        );
        let effective = user.api_key_scopes();
        assert_eq!(effective, vec![Scope::LibraryRead, Scope::Admin]);
    }
}
