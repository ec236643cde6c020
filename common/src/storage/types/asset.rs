use base64::{engine::general_purpose::STANDARD, Engine as _};
use object_store::Error as ObjectStoreError;
use sha2::{Digest, Sha256};
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::{
    storage::{db::SurrealDbClient, store::StorageManager},
    stored_object,
};

/// Longest storage-key stem kept after sanitisation.
const MAX_STEM_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Invalid checksum encoding: {0}")]
    BadChecksum(String),

    #[error("Refusing to register an empty file")]
    EmptyFile,
}

stored_object!(Asset, "asset", {
    checksum: String,
    media_type: String,
    size: u64,
    storage_key: String,
    file_name: String
});

impl Asset {
    /// A new content-addressed asset row. The checksum is hex-encoded
    /// SHA-256; a zero size is rejected.
    pub fn new(
        checksum: String,
        media_type: String,
        size: u64,
        storage_key: String,
        file_name: String,
    ) -> Result<Self, AssetError> {
        if size == 0 {
            return Err(AssetError::EmptyFile);
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            checksum,
            media_type,
            size,
            storage_key,
            file_name,
        })
    }

    /// Hex-encoded SHA-256 of the given bytes.
    pub fn checksum_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Decodes the base64 checksum the upload API carries into the hex form
    /// stored on the row.
    pub fn decode_checksum(value: &str) -> Result<String, AssetError> {
        let bytes = STANDARD
            .decode(value)
            .map_err(|e| AssetError::BadChecksum(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(AssetError::BadChecksum(format!(
                "expected 32 digest bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    pub async fn get_by_checksum(
        checksum: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Asset>, AssetError> {
        let mut response = db
            .query("SELECT * FROM asset WHERE checksum = $checksum LIMIT 1")
            .bind(("checksum", checksum.to_string()))
            .await?;
        let assets: Vec<Asset> = response.take(0)?;
        Ok(assets.into_iter().next())
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Asset, AssetError> {
        match db.get_item::<Asset>(id).await {
            Ok(Some(asset)) => Ok(asset),
            Ok(None) => Err(AssetError::NotFound(id.to_string())),
            Err(e) => Err(AssetError::Surreal(e)),
        }
    }

    /// Reads the stored bytes back from the object store.
    pub async fn content(&self, storage: &StorageManager) -> Result<bytes::Bytes, AssetError> {
        storage
            .get(&self.storage_key)
            .await
            .map_err(AssetError::from)
    }

    /// Derives a fresh storage key for an upload: a new UUID prefix over
    /// the sanitised file name.
    pub fn storage_key_for(file_name: &str) -> String {
        format!("{}/{}", Uuid::new_v4(), Self::sanitize_file_name(file_name))
    }

    /// Sanitises a file name for use inside an object key: diacritics are
    /// stripped (NFD, combining marks dropped), `&` becomes `and`, anything
    /// outside `[A-Za-z0-9._-]` becomes `_`, runs of `_` collapse, and the
    /// stem is capped at 100 characters with the extension preserved.
    pub fn sanitize_file_name(file_name: &str) -> String {
        let decomposed: String = file_name
            .nfd()
            .filter(|c| !is_combining_mark(*c))
            .collect::<String>()
            .replace('&', "and");

        let mut sanitized = String::with_capacity(decomposed.len());
        let mut previous_underscore = false;
        for c in decomposed.chars() {
            let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            };
            if mapped == '_' {
                if !previous_underscore {
                    sanitized.push('_');
                }
                previous_underscore = true;
            } else {
                sanitized.push(mapped);
                previous_underscore = false;
            }
        }

        let (stem, extension) = match sanitized.rfind('.') {
            Some(idx) if idx > 0 => sanitized.split_at(idx),
            _ => (sanitized.as_str(), ""),
        };
        let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
        format!("{stem}{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_diacritics_and_ampersands() {
        assert_eq!(
            Asset::sanitize_file_name("Crème Brûlée & Friends.epub"),
            "Creme_Brulee_and_Friends.epub"
        );
        assert_eq!(Asset::sanitize_file_name("clean-name_1.mobi"), "clean-name_1.mobi");
    }

    #[test]
    fn test_sanitize_collapses_underscore_runs() {
        assert_eq!(Asset::sanitize_file_name("a   ///  b.pdf"), "a_b.pdf");
        assert_eq!(Asset::sanitize_file_name("..\\..\\esc.pdf"), ".._.._esc.pdf");
    }

    #[test]
    fn test_sanitize_truncates_stem_but_keeps_extension() {
        let long = format!("{}{}", "x".repeat(150), ".azw3");
        let sanitized = Asset::sanitize_file_name(&long);
        assert_eq!(sanitized.len(), 100 + ".azw3".len());
        assert!(sanitized.ends_with(".azw3"));
    }

    #[test]
    fn test_storage_key_is_uuid_prefixed() {
        let key = Asset::storage_key_for("Ein Buch.mobi");
        let (prefix, name) = key.split_once('/').expect("prefix");
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(name, "Ein_Buch.mobi");
    }

    #[test]
    fn test_checksum_hex_and_base64_agree() {
        let bytes = b"some book bytes";
        let hex = Asset::checksum_hex(bytes);
        assert_eq!(hex.len(), 64);

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let encoded = STANDARD.encode(hasher.finalize());
        assert_eq!(Asset::decode_checksum(&encoded).unwrap(), hex);
    }

    #[test]
    fn test_decode_checksum_rejects_garbage() {
        assert!(matches!(
            Asset::decode_checksum("not base64!!!"),
            Err(AssetError::BadChecksum(_))
        ));
        assert!(matches!(
            Asset::decode_checksum(&STANDARD.encode(b"short")),
            Err(AssetError::BadChecksum(_))
        ));
    }

    #[test]
    fn test_new_rejects_empty_files() {
        let result = Asset::new(
            "ab".repeat(32),
            "application/x-mobipocket-ebook".into(),
            0,
            "key/file.mobi".into(),
            "file.mobi".into(),
        );
        assert!(matches!(result, Err(AssetError::EmptyFile)));
    }

    #[tokio::test]
    async fn test_checksum_lookup_round_trip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");

        let asset = Asset::new(
            Asset::checksum_hex(b"unique bytes"),
            "application/epub+zip".into(),
            12,
            Asset::storage_key_for("b.epub"),
            "b.epub".into(),
        )
        .expect("asset");

        db.store_item(asset.clone()).await.expect("store");

        let found = Asset::get_by_checksum(&asset.checksum, &db)
            .await
            .expect("lookup");
        assert_eq!(found.as_ref().map(|a| a.id.as_str()), Some(asset.id.as_str()));

        let missing = Asset::get_by_checksum(&Asset::checksum_hex(b"other"), &db)
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        match Asset::get_by_id("missing-id", &db).await {
            Err(AssetError::NotFound(id)) => assert_eq!(id, "missing-id"),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }
}
