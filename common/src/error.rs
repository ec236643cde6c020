use thiserror::Error;
use tokio::task::JoinError;

use crate::storage::types::asset::AssetError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("Object store error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
