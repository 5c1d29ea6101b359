//! Per-request orchestration: variant tier, original tier, origin, transcode.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;
use common::storage::{BoxReader, ContentHash, ObjectStore};
use common::{Reference, ResizeDirective, StorageKeys};
use sea_orm::DatabaseConnection;
use tracing::{debug, instrument};

use crate::cache::{Conditional, TieredCache, UploadScheduler, if_none_match_matches};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::origin::{FetchConfig, FetchError, FetchOutcome, OriginFetcher, OriginResolver};
use crate::transcode::{OUTPUT_CONTENT_TYPE, Transcoder};

/// Where the original bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    OrigCache,
    Remote,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::OrigCache => f.write_str("orig-cache"),
            Source::Remote => f.write_str("remote"),
        }
    }
}

/// Provenance tag reported in `X-Source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Served from the variant tier.
    ResizedCache,
    /// Transcoded from an original in hand.
    Resized(Source),
    /// Original bytes served as is.
    Original(Source),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::ResizedCache => f.write_str("resized-cache"),
            Provenance::Resized(source) => write!(f, "resized-{source}"),
            Provenance::Original(source) => write!(f, "orig-{source}"),
        }
    }
}

pub enum ImageBody {
    Empty,
    Bytes(Bytes),
    Stream(BoxReader),
}

/// Everything the handler needs to write a response.
pub struct ImageResponse {
    pub status: StatusCode,
    pub content_type: String,
    /// Unquoted strong validator.
    pub validator: String,
    pub content_length: Option<u64>,
    pub provenance: Provenance,
    pub body: ImageBody,
}

impl ImageResponse {
    fn from_conditional(conditional: Conditional, provenance: Provenance) -> Self {
        match conditional {
            Conditional::NotModified(meta) => Self {
                status: StatusCode::NOT_MODIFIED,
                content_type: meta.content_type,
                validator: meta.validator,
                content_length: None,
                provenance,
                body: ImageBody::Empty,
            },
            Conditional::Body { meta, reader } => Self {
                status: StatusCode::OK,
                content_type: meta.content_type,
                validator: meta.validator,
                content_length: Some(meta.size),
                provenance,
                body: ImageBody::Stream(reader),
            },
        }
    }

    /// A freshly produced body, or 304 when the client already holds it.
    fn buffered(
        status: StatusCode,
        content_type: &str,
        validator: String,
        bytes: Bytes,
        provenance: Provenance,
        if_none_match: Option<&str>,
    ) -> Self {
        if if_none_match.is_some_and(|header| if_none_match_matches(header, &validator)) {
            return Self {
                status: StatusCode::NOT_MODIFIED,
                content_type: content_type.to_string(),
                validator,
                content_length: None,
                provenance,
                body: ImageBody::Empty,
            };
        }
        Self {
            status,
            content_type: content_type.to_string(),
            validator,
            content_length: Some(bytes.len() as u64),
            provenance,
            body: ImageBody::Bytes(bytes),
        }
    }
}

/// Original bytes obtained from the origin and already handed to the uploader.
struct RemoteOriginal {
    bytes: Bytes,
    content_type: String,
    status: StatusCode,
    validator: String,
}

#[derive(Clone)]
pub struct ImagePipeline {
    prefix: String,
    cache: TieredCache,
    resolver: OriginResolver,
    fetcher: OriginFetcher,
    transcoder: Transcoder,
    uploads: UploadScheduler,
}

impl ImagePipeline {
    pub fn new(
        prefix: impl Into<String>,
        cache: TieredCache,
        resolver: OriginResolver,
        fetcher: OriginFetcher,
        transcoder: Transcoder,
        uploads: UploadScheduler,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            cache,
            resolver,
            fetcher,
            transcoder,
            uploads,
        }
    }

    /// Wire the pipeline from shared clients built at startup.
    pub fn from_config(
        config: &AppConfig,
        db: DatabaseConnection,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, FetchError> {
        let cache = TieredCache::new(
            store,
            Duration::from_secs(config.storage.op_timeout_secs),
        );
        let uploads = UploadScheduler::new(cache.clone(), &config.upload);
        let fetcher = OriginFetcher::new(FetchConfig::from(&config.origin))?;

        Ok(Self::new(
            config.storage.prefix.clone(),
            cache,
            OriginResolver::new(db),
            fetcher,
            Transcoder::new(config.resize.quality),
            uploads,
        ))
    }

    #[instrument(skip(self, reference, if_none_match), fields(entity = %reference.entity, id = reference.id))]
    pub async fn serve(
        &self,
        reference: &Reference,
        if_none_match: Option<&str>,
    ) -> Result<ImageResponse, AppError> {
        let keys = StorageKeys::derive(&self.prefix, reference);

        match reference.resize {
            Some(directive) => self.serve_variant(reference, &keys, directive, if_none_match).await,
            None => self.serve_original(reference, &keys, if_none_match).await,
        }
    }

    async fn serve_original(
        &self,
        reference: &Reference,
        keys: &StorageKeys,
        if_none_match: Option<&str>,
    ) -> Result<ImageResponse, AppError> {
        let provenance = Provenance::Original(Source::OrigCache);
        if let Some(hit) = self
            .cache
            .get_if_not_matching(&keys.original, if_none_match)
            .await?
        {
            debug!(key = %keys.original, source = %provenance, "original tier hit");
            return Ok(ImageResponse::from_conditional(hit, provenance));
        }

        let remote = self.fetch_original(reference, keys).await?;
        Ok(ImageResponse::buffered(
            remote.status,
            &remote.content_type,
            remote.validator,
            remote.bytes,
            Provenance::Original(Source::Remote),
            if_none_match,
        ))
    }

    async fn serve_variant(
        &self,
        reference: &Reference,
        keys: &StorageKeys,
        directive: ResizeDirective,
        if_none_match: Option<&str>,
    ) -> Result<ImageResponse, AppError> {
        if let Some(hit) = self
            .cache
            .get_if_not_matching(&keys.variant, if_none_match)
            .await?
        {
            debug!(key = %keys.variant, "variant tier hit");
            return Ok(ImageResponse::from_conditional(hit, Provenance::ResizedCache));
        }

        let (original, source, status) = match self.cache.get(&keys.original).await? {
            Some(object) => {
                debug!(key = %keys.original, "original tier hit");
                (object.bytes, Source::OrigCache, StatusCode::OK)
            }
            None => {
                let remote = self.fetch_original(reference, keys).await?;
                (remote.bytes, Source::Remote, remote.status)
            }
        };

        let transcoder = self.transcoder;
        let resized = tokio::task::spawn_blocking(move || transcoder.resize(&original, directive))
            .await
            .map_err(|e| AppError::Internal(format!("transcode task failed: {e}")))??;

        let validator = self
            .uploads
            .store(&keys.variant, OUTPUT_CONTENT_TYPE, resized.clone())
            .await?;

        Ok(ImageResponse::buffered(
            status,
            OUTPUT_CONTENT_TYPE,
            validator,
            resized,
            Provenance::Resized(source),
            if_none_match,
        ))
    }

    /// Resolve and download the original, writing it back when the origin answered 200.
    async fn fetch_original(
        &self,
        reference: &Reference,
        keys: &StorageKeys,
    ) -> Result<RemoteOriginal, AppError> {
        let url = self
            .resolver
            .resolve(reference.entity, reference.id, &reference.hash)
            .await?;

        let image = match self.fetcher.fetch(&url).await? {
            FetchOutcome::Fetched(image) => image,
            FetchOutcome::Absent => {
                return Err(AppError::NotFound(format!(
                    "origin has no image for {} {}",
                    reference.entity, reference.id
                )));
            }
            FetchOutcome::UpstreamStatus(status) => return Err(AppError::UpstreamStatus(status)),
        };

        let validator = if image.status == StatusCode::OK {
            self.uploads
                .store(&keys.original, &image.content_type, image.bytes.clone())
                .await?
        } else {
            debug!(status = image.status.as_u16(), "not caching non-200 origin response");
            ContentHash::compute(&image.bytes).to_hex()
        };

        Ok(RemoteOriginal {
            bytes: image.bytes,
            content_type: image.content_type,
            status: image.status,
            validator,
        })
    }
}
