use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Cache directive attached to every stored object.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Metadata of a stored object, available without reading its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub content_type: String,
    /// Strong validator assigned by the store (unquoted).
    pub validator: String,
    pub size: u64,
}

/// A fully buffered stored object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub bytes: Bytes,
}

/// Key-addressed object storage.
///
/// Writes replace the whole object; readers never observe a partial write.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch object metadata. Returns `None` if the key does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError>;

    /// Open an object for streaming. Returns `None` if the key does not exist.
    async fn get_stream(&self, key: &str)
    -> Result<Option<(ObjectMeta, BoxReader)>, StorageError>;

    /// Read a whole object into memory.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let Some((meta, mut reader)) = self.get_stream(key).await? else {
            return Ok(None);
        };
        let mut buf = Vec::with_capacity(meta.size as usize);
        reader.read_to_end(&mut buf).await?;
        Ok(Some(StoredObject {
            meta,
            bytes: Bytes::from(buf),
        }))
    }

    /// Create or overwrite an object and return its new metadata.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<ObjectMeta, StorageError>;
}
