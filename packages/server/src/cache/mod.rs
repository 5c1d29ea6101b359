//! Tiered image cache on top of an [`ObjectStore`].

mod upload;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::storage::filesystem::FilesystemObjectStore;
use common::storage::s3_store::{S3ObjectStore, S3Settings};
use common::storage::{BoxReader, ObjectMeta, ObjectStore, StorageError, StoredObject};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{StorageBackend, StorageConfig};

pub use upload::UploadScheduler;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("object store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of a conditional read.
pub enum Conditional {
    /// The client's validator matches the stored object.
    NotModified(ObjectMeta),
    /// The stored object, streamed.
    Body { meta: ObjectMeta, reader: BoxReader },
}

#[derive(Clone)]
pub struct TieredCache {
    store: Arc<dyn ObjectStore>,
    op_timeout: Duration,
}

impl TieredCache {
    pub fn new(store: Arc<dyn ObjectStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    async fn timed<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        }
    }

    #[instrument(skip(self))]
    pub async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, CacheError> {
        self.timed(self.store.head(key)).await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<StoredObject>, CacheError> {
        let object = self.timed(self.store.get(key)).await?;
        debug!(hit = object.is_some(), "cache lookup");
        Ok(object)
    }

    /// Write a whole object and return the validator the store assigned.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, CacheError> {
        let meta = self.timed(self.store.put(key, content_type, data)).await?;
        Ok(meta.validator)
    }

    /// Head the object and compare validators before transferring the body.
    ///
    /// The timeout covers opening the stream, not draining it.
    #[instrument(skip(self))]
    pub async fn get_if_not_matching(
        &self,
        key: &str,
        client_validator: Option<&str>,
    ) -> Result<Option<Conditional>, CacheError> {
        if let Some(header) = client_validator {
            let Some(meta) = self.head(key).await? else {
                return Ok(None);
            };
            if if_none_match_matches(header, &meta.validator) {
                debug!("validator matches");
                return Ok(Some(Conditional::NotModified(meta)));
            }
        }

        let opened = self.timed(self.store.get_stream(key)).await?;
        debug!(hit = opened.is_some(), "cache lookup");
        Ok(opened.map(|(meta, reader)| Conditional::Body { meta, reader }))
    }
}

/// Compare an `If-None-Match` header against an unquoted strong validator.
///
/// Accepts `*`, weak tags and comma separated lists.
pub fn if_none_match_matches(header: &str, validator: &str) -> bool {
    header.split(',').map(str::trim).any(|tag| {
        if tag == "*" {
            return true;
        }
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag.trim_matches('"') == validator
    })
}

/// Build the configured object store backend.
pub async fn open_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.backend {
        StorageBackend::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                StorageError::Backend("storage.s3 section is required for the s3 backend".into())
            })?;
            let store = S3ObjectStore::new(&S3Settings {
                endpoint: s3.endpoint.clone(),
                region: s3.region.clone(),
                bucket: s3.bucket.clone(),
                access_key: s3.access_key.clone(),
                secret_key: s3.secret_key.clone(),
            })?;
            Ok(Arc::new(store))
        }
        StorageBackend::Filesystem => {
            let fs = config.filesystem.as_ref().ok_or_else(|| {
                StorageError::Backend(
                    "storage.filesystem section is required for the filesystem backend".into(),
                )
            })?;
            Ok(Arc::new(FilesystemObjectStore::new(fs.root.clone()).await?))
        }
    }
}
