//! Object storage backend abstraction (S3/MinIO/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::blob_store::{BlobStore, BlobStream};
use crate::error::{BlobStoreError, Result};

/// Configuration for the object storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// [`BlobStore`] over the `object_store` crate.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    inner: Arc<dyn ObjectStore>,
    // S3 handle kept separately for URL signing
    signer: Option<Arc<AmazonS3>>,
    backend: &'static str,
}

impl ObjectStorage {
    /// Create a new storage backend from configuration.
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        match &config {
            ObjectStoreConfig::Memory => Ok(Self::memory()),

            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                let store = LocalFileSystem::new_with_prefix(path)
                    .map_err(|e| BlobStoreError::InvalidConfig(e.to_string()))?;
                Ok(Self {
                    inner: Arc::new(store),
                    signer: None,
                    backend: "local",
                })
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let s3 = Arc::new(
                    builder
                        .build()
                        .map_err(|e| BlobStoreError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast if the bucket doesn't exist
                {
                    let prefix = ObjectPath::from("");
                    let mut stream = s3.list(Some(&prefix));
                    match stream.try_next().await {
                        Ok(_) => {}
                        Err(object_store::Error::NotFound { .. }) => {
                            return Err(BlobStoreError::BucketNotFound(bucket.clone()));
                        }
                        Err(e) => {
                            let msg = e.to_string();
                            if msg.contains("NoSuchBucket") {
                                return Err(BlobStoreError::BucketNotFound(bucket.clone()));
                            }
                            return Err(e.into());
                        }
                    }
                }

                info!(endpoint = %endpoint, bucket = %bucket, "connected to S3 object storage");
                Ok(Self {
                    inner: s3.clone(),
                    signer: Some(s3),
                    backend: "s3",
                })
            }
        }
    }

    /// Create an in-memory storage backend.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            signer: None,
            backend: "memory",
        }
    }

    /// Name of the configured backend, for diagnostics.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Translate an opaque storage key into an object path.
    fn object_path(key: &str) -> Result<ObjectPath> {
        if key.is_empty()
            || key
                .split('/')
                .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(ObjectPath::from_iter(key.split('/')))
    }

    /// Local filesystem storage cannot persist object attributes.
    fn keeps_attributes(&self) -> bool {
        self.backend != "local"
    }
}

#[async_trait::async_trait]
impl BlobStore for ObjectStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()> {
        let path = Self::object_path(key)?;
        let size = data.len();

        let mut opts = PutOptions::default();
        if let (Some(content_type), true) = (content_type, self.keeps_attributes()) {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
            opts.attributes = attributes;
        }

        self.inner
            .put_opts(&path, PutPayload::from(data), opts)
            .await?;
        debug!(key = %key, size = size, "blob stored");
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<BlobStream> {
        let path = Self::object_path(key)?;
        match self.inner.get(&path).await {
            Ok(result) => Ok(result.into_stream().map_err(BlobStoreError::from).boxed()),
            Err(object_store::Error::NotFound { .. }) => {
                Err(BlobStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = Self::object_path(key)?;
        // The blob may already be gone
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                debug!(key = %key, "blob removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn presigned_get(&self, key: &str, ttl: Duration) -> Result<Url> {
        let path = Self::object_path(key)?;
        let signer = self.signer.as_ref().ok_or(BlobStoreError::Unsupported {
            backend: self.backend,
            operation: "presigned urls",
        })?;
        let url = signer.signed_url(http::Method::GET, &path, ttl).await?;
        Ok(url)
    }
}

impl ObjectStorage {
    /// Check if a blob exists in storage.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        let path = Self::object_path(key)?;
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = ObjectStorage::memory();

        let key = "7/0b5c/report.pdf";
        let data = Bytes::from("hello world");

        storage
            .put(key, data.clone(), Some("application/pdf"))
            .await
            .unwrap();
        let retrieved = storage.get(key).await.unwrap();
        assert_eq!(retrieved, data);
        assert!(storage.contains(key).await.unwrap());

        storage.remove(key).await.unwrap();
        assert!(!storage.contains(key).await.unwrap());

        // Removing twice is fine
        storage.remove(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let storage = ObjectStorage::memory();
        let err = storage.get("1/none/file.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ObjectStoreConfig::Local {
            path: temp_dir.path().to_path_buf(),
        };

        let storage = ObjectStorage::new(config).await.unwrap();
        assert_eq!(storage.backend(), "local");

        let key = "3/f00d/notes.txt";
        let data = Bytes::from("test data");

        // Content type is dropped silently on local storage
        storage
            .put(key, data.clone(), Some("text/plain"))
            .await
            .unwrap();
        let retrieved = storage.get(key).await.unwrap();
        assert_eq!(retrieved, data);

        let file_path = temp_dir.path().join("3").join("f00d").join("notes.txt");
        assert!(file_path.exists());
    }

    #[tokio::test]
    async fn test_rejects_malformed_keys() {
        let storage = ObjectStorage::memory();
        for key in ["", "a//b", "../etc", "a/./b"] {
            let err = storage.put(key, Bytes::from("x"), None).await.unwrap_err();
            assert!(matches!(err, BlobStoreError::InvalidKey(_)), "{key}");
        }
    }

    #[tokio::test]
    async fn test_presign_unsupported_on_memory() {
        let storage = ObjectStorage::memory();
        storage.put("1/a/b.txt", Bytes::from("x"), None).await.unwrap();
        let err = storage
            .presigned_get("1/a/b.txt", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::Unsupported { .. }));
    }
}
