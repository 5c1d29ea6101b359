use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{
    BoxReader, IMMUTABLE_CACHE_CONTROL, ObjectMeta, ObjectStore, StoredObject,
};

/// Connection settings for an S3-compatible bucket (AWS, R2, MinIO).
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Object store backed by an S3-compatible bucket using path-style addressing.
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(settings: &S3Settings) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(&settings.access_key),
            Some(&settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid S3 credentials: {e}")))?;

        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(backend_error)?
            .with_path_style();

        Ok(Self { bucket })
    }
}

fn backend_error(err: S3Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// S3 reports ETags wrapped in quotes.
fn clean_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

/// Metadata of a GET response; the size is always the body actually received.
fn object_meta(headers: &HashMap<String, String>, bytes: &Bytes) -> ObjectMeta {
    let validator = headers
        .get("etag")
        .map(|etag| clean_etag(etag))
        .filter(|etag| !etag.is_empty())
        .unwrap_or_else(|| ContentHash::compute(bytes).to_hex());
    let content_type = headers
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    ObjectMeta {
        content_type,
        validator,
        size: bytes.len() as u64,
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StorageError::Backend(format!(
            "unexpected status {status} for {key}"
        )))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let (head, status) = match self.bucket.head_object(key).await {
            Ok(found) => found,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };
        if status == 404 {
            return Ok(None);
        }
        check_status(key, status)?;

        Ok(Some(ObjectMeta {
            content_type: head
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            validator: head.e_tag.as_deref().map(clean_etag).unwrap_or_default(),
            size: head
                .content_length
                .and_then(|len| u64::try_from(len).ok())
                .unwrap_or(0),
        }))
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> Result<Option<(ObjectMeta, BoxReader)>, StorageError> {
        // Streamed GETs expose no headers, so a separate HEAD could describe a
        // different version than the body. One GET yields both.
        Ok(self.get(key).await?.map(|object| {
            let reader: BoxReader = Box::new(Cursor::new(object.bytes));
            (object.meta, reader)
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let response = match self.bucket.get_object(key).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };
        if response.status_code() == 404 {
            return Ok(None);
        }
        check_status(key, response.status_code())?;

        let bytes = response.bytes().clone();
        Ok(Some(StoredObject {
            meta: object_meta(&response.headers(), &bytes),
            bytes,
        }))
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<ObjectMeta, StorageError> {
        let response = self
            .bucket
            .put_object_builder(key, &data)
            .with_content_type(content_type)
            .with_cache_control(IMMUTABLE_CACHE_CONTROL)
            .map_err(backend_error)?
            .execute()
            .await
            .map_err(backend_error)?;
        check_status(key, response.status_code())?;

        let validator = response
            .headers()
            .get("etag")
            .map(|etag| clean_etag(etag))
            .filter(|etag| !etag.is_empty())
            .unwrap_or_else(|| ContentHash::compute(&data).to_hex());

        Ok(ObjectMeta {
            content_type: content_type.to_string(),
            validator,
            size: data.len() as u64,
        })
    }
}
