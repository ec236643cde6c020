use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::signer::Signer;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Storage manager over the configured object store backend.
///
/// Local and memory backends serve development and tests; S3 is the
/// production backend and the only one that can mint real presigned URLs.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
    signer: Option<Arc<AmazonS3>>,
}

/// A URL an uploader can PUT bytes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUpload {
    pub url: String,
    pub expires_in: Duration,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base, signer) = create_storage_backend(cfg)?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
            signer,
        })
    }

    /// Injects a specific backend; used by tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
            signer: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// A URL the uploader can PUT the object to.
    ///
    /// S3 signs a real URL; the local and memory backends hand out an
    /// application-relative path served by the upload route.
    pub async fn presign_put(
        &self,
        location: &str,
        expires_in: Duration,
    ) -> object_store::Result<PresignedUpload> {
        let url = match &self.signer {
            Some(signer) => {
                let path = ObjPath::from(location);
                signer
                    .signed_url(http::Method::PUT, &path, expires_in)
                    .await?
                    .to_string()
            }
            None => format!("/api/v1/books/upload/{location}"),
        };
        Ok(PresignedUpload { url, expires_in })
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Best-effort removal of directories the local backend leaves behind.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);
        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(()) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>, Option<Arc<AmazonS3>>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            std::fs::create_dir_all(&base).map_err(|e| object_store::Error::Generic {
                store: "LocalFileSystem",
                source: e.into(),
            })?;
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base), None))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None, None))
        }
        StorageKind::S3 => {
            let s3_cfg = cfg.s3.as_ref().ok_or_else(|| object_store::Error::Generic {
                store: "AmazonS3",
                source: "storage = s3 requires an [s3] config section".into(),
            })?;
            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(&s3_cfg.bucket)
                .with_region(&s3_cfg.region)
                .with_access_key_id(&s3_cfg.access_key_id)
                .with_secret_access_key(&s3_cfg.secret_access_key);
            if let Some(endpoint) = &s3_cfg.endpoint {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }
            let s3 = Arc::new(builder.build()?);
            Ok((Arc::clone(&s3) as DynStore, None, Some(s3)))
        }
    }
}

/// Resolves the local storage base directory from config; relative paths
/// are anchored at the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

/// Splits a logical object location `"a/b/c"` into `("a/b", "c")`.
pub fn split_object_path(path: &str) -> Result<(String, String), crate::error::AppError> {
    path.rsplit_once('/')
        .map(|(prefix, name)| (prefix.to_string(), name.to_string()))
        .ok_or_else(|| {
            crate::error::AppError::Validation(format!("Object path has no separator: {path}"))
        })
}

/// Testing utilities: memory-backed storage with automatic isolation.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::utils::config::AppConfig;

    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            storage: StorageKind::Memory,
            ..AppConfig::default()
        }
    }

    pub fn test_config_local() -> AppConfig {
        AppConfig {
            storage: StorageKind::Local,
            data_dir: format!("/tmp/library_test_storage_{}", uuid::Uuid::new_v4()),
            ..AppConfig::default()
        }
    }

    #[derive(Clone)]
    pub struct TestStorageManager {
        storage: StorageManager,
        _temp_dir: Option<PathBuf>,
    }

    impl TestStorageManager {
        pub async fn new_memory() -> object_store::Result<Self> {
            let cfg = test_config_memory();
            let storage = StorageManager::new(&cfg).await?;
            Ok(Self {
                storage,
                _temp_dir: None,
            })
        }

        pub async fn new_local() -> object_store::Result<Self> {
            let cfg = test_config_local();
            let storage = StorageManager::new(&cfg).await?;
            let temp_dir = storage.local_base_path().map(Path::to_path_buf);
            Ok(Self {
                storage,
                _temp_dir: temp_dir,
            })
        }

        pub fn storage(&self) -> &StorageManager {
            &self.storage
        }

        pub async fn put(&self, location: &str, data: &[u8]) -> object_store::Result<()> {
            self.storage.put(location, Bytes::from(data.to_vec())).await
        }

        pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
            self.storage.get(location).await
        }

        pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
            self.storage.exists(location).await
        }
    }

    impl Drop for TestStorageManager {
        fn drop(&mut self) {
            if let Some(path) = &self._temp_dir {
                if path.exists() {
                    let _ = std::fs::remove_dir_all(path);
                }
            }
        }
    }
}
