use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::storage::ContentHash;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};

use super::{CacheError, TieredCache};
use crate::config::{UploadConfig, UploadMode};

/// Writes fetched and transcoded images back to the cache.
#[derive(Clone)]
pub struct UploadScheduler {
    cache: TieredCache,
    mode: UploadMode,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl UploadScheduler {
    pub fn new(cache: TieredCache, config: &UploadConfig) -> Self {
        Self {
            cache,
            mode: config.mode,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Store `data` under `key` and return the validator to hand to the client.
    ///
    /// In sync mode this is the store's validator and a failed write fails the
    /// call. In async mode the write is detached and the validator is the MD5
    /// of `data`; when every permit is taken the write is skipped.
    pub async fn store(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, CacheError> {
        match self.mode {
            UploadMode::Sync => self.cache.put(key, content_type, data).await,
            UploadMode::Async => {
                let validator = ContentHash::compute(&data).to_hex();
                self.spawn_upload(key, content_type, data);
                Ok(validator)
            }
        }
    }

    fn spawn_upload(&self, key: &str, content_type: &str, data: Bytes) {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(key, "upload pool saturated, dropping cache write");
                return;
            }
        };

        let cache = self.cache.clone();
        let timeout = self.timeout;
        let key = key.to_string();
        let content_type = content_type.to_string();
        let span = info_span!("background_upload", key = %key);

        tokio::spawn(
            async move {
                let _permit = permit;
                match tokio::time::timeout(timeout, cache.put(&key, &content_type, data)).await {
                    Ok(Ok(_)) => debug!("background upload finished"),
                    Ok(Err(e)) => warn!(error = %e, "background upload failed"),
                    Err(_) => warn!(?timeout, "background upload timed out"),
                }
            }
            .instrument(span),
        );
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
