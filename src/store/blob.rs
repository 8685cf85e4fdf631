//! Raw file persistence behind an S3-compatible key/value contract
//!
//! The trait mirrors a thin object-store client: idempotent bucket creation,
//! whole-object put/get, opaque keys. The shipped backend maps buckets to
//! directories under a configured root; deployments fronting real object
//! storage swap the implementation behind the trait.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, ServiceError, StorageError};

/// Trait for blob storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Idempotent bucket creation; called on first upload
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// Store an object under `bucket/key`
    async fn put(&self, bucket: &str, key: &str, body: &[u8], content_type: &str) -> Result<()>;

    /// Fetch the full object at `bucket/key`
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Blob key for an uploaded document: `documents/{uuid}-{filename}`
pub fn document_key(filename: &str) -> String {
    format!("documents/{}-{}", Uuid::new_v4(), filename)
}

/// Filesystem-backed blob store
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `bucket/key` under the root, rejecting traversal attempts
    fn resolve(&self, bucket: &str, key: &str) -> std::result::Result<PathBuf, StorageError> {
        for part in [bucket, key] {
            if part.is_empty()
                || part.starts_with('/')
                || part.split('/').any(|segment| segment == "..")
            {
                return Err(StorageError::InvalidKey(format!("{}/{}", bucket, key)));
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.resolve(bucket, ".keep")?;
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(bucket.to_string()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::StorageFailed(e.to_string()))?;
        debug!("Bucket ready at {}", dir.display());
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, body: &[u8], _content_type: &str) -> Result<()> {
        let path = self.resolve(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::StorageFailed(e.to_string()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| StorageError::StorageFailed(e.to_string()))?;
        debug!("Stored {} bytes at {}/{}", body.len(), bucket, key);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ServiceError::NotFound(
                format!("blob {}/{}", bucket, key),
            )),
            Err(e) => Err(StorageError::StorageFailed(e.to_string()).into()),
        }
    }
}
