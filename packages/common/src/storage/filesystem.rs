use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{BoxReader, ObjectMeta, ObjectStore};

/// Filesystem-backed object store.
///
/// Each object is a single file at `{base_path}/{key}` holding a length-prefixed
/// JSON metadata header followed by the body:
/// `[u32 BE header length][ObjectMeta JSON][body bytes]`.
/// Writes go to `{base_path}/.tmp` first and are renamed into place, so a reader
/// sees either the previous object or the new one, never a mix.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
}

impl FilesystemObjectStore {
    /// Create a new filesystem object store.
    pub async fn new(base_path: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self { base_path })
    }

    /// Map a key onto a path below the base directory.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(part) if part != ".tmp"));
        if !well_formed {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn open(
        &self,
        key: &str,
    ) -> Result<Option<(ObjectMeta, BufReader<fs::File>)>, StorageError> {
        let path = self.object_path(key)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let header_len = reader.read_u32().await?;
        let mut header = vec![0u8; header_len as usize];
        reader.read_exact(&mut header).await?;
        let meta: ObjectMeta = serde_json::from_slice(&header)?;

        Ok(Some((meta, reader)))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        Ok(self.open(key).await?.map(|(meta, _)| meta))
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> Result<Option<(ObjectMeta, BoxReader)>, StorageError> {
        Ok(self
            .open(key)
            .await?
            .map(|(meta, reader)| (meta, Box::new(reader) as BoxReader)))
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<ObjectMeta, StorageError> {
        let object_path = self.object_path(key)?;
        let meta = ObjectMeta {
            content_type: content_type.to_string(),
            validator: ContentHash::compute(&data).to_hex(),
            size: data.len() as u64,
        };
        let header = serde_json::to_vec(&meta)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| StorageError::InvalidKey(format!("{key}: metadata too large")))?;

        let temp_path = self.temp_path();
        let written = async {
            let mut temp_file = fs::File::create(&temp_path).await?;
            temp_file.write_u32(header_len).await?;
            temp_file.write_all(&header).await?;
            temp_file.write_all(&data).await?;
            temp_file.flush().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp_path, &object_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(meta)
    }
}
