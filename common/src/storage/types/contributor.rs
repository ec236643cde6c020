use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// The MARC relator subset the library understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relator {
    /// Author
    Aut,
    /// Book producer
    Bkp,
    /// Contributor
    Ctb,
    /// Editor
    Edt,
    /// Illustrator
    Ill,
    /// Narrator
    Nrt,
    /// Publisher
    Pbl,
    /// Translator
    Trl,
}

impl Relator {
    pub fn code(self) -> &'static str {
        match self {
            Self::Aut => "aut",
            Self::Bkp => "bkp",
            Self::Ctb => "ctb",
            Self::Edt => "edt",
            Self::Ill => "ill",
            Self::Nrt => "nrt",
            Self::Pbl => "pbl",
            Self::Trl => "trl",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "aut" => Some(Self::Aut),
            "bkp" => Some(Self::Bkp),
            "ctb" => Some(Self::Ctb),
            "edt" => Some(Self::Edt),
            "ill" => Some(Self::Ill),
            "nrt" => Some(Self::Nrt),
            "pbl" => Some(Self::Pbl),
            "trl" => Some(Self::Trl),
            _ => None,
        }
    }
}

stored_object!(Contributor, "contributor", {
    work_id: String,
    name: String,
    sorting_key: String,
    roles: Vec<Relator>
});

impl Contributor {
    /// A contributor on a work; at least one role is required.
    pub fn new(
        work_id: &str,
        name: String,
        sorting_key: String,
        roles: Vec<Relator>,
    ) -> Result<Self, AppError> {
        if roles.is_empty() {
            return Err(AppError::Validation(format!(
                "contributor {name} must carry at least one role"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            work_id: work_id.to_string(),
            name,
            sorting_key,
            roles,
        })
    }

    pub async fn list_for_work(
        work_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Contributor>, AppError> {
        let mut response = db
            .query("SELECT * FROM contributor WHERE work_id = $work_id ORDER BY sorting_key ASC")
            .bind(("work_id", work_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}
