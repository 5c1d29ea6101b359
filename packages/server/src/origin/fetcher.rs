//! Origin fetch loop with manual redirect handling.
//!
//! Redirects are followed by hand so that `Location` headers can be inspected:
//! a redirect to one of the configured absent markers (e.g. `no-poster.gif`)
//! means the entity has no image and ends the loop as if the origin had
//! answered 404. Root-relative locations are joined onto `scheme://host` of
//! the current URL; other relative forms are not resolved.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::OriginConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("origin request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid origin url {0:?}")]
    InvalidUrl(String),

    #[error("redirect without location")]
    RedirectWithoutLocation,

    #[error("invalid redirect location {0:?}")]
    InvalidLocation(String),

    #[error("more than {0} redirects")]
    TooManyRedirects(usize),

    #[error("origin body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

/// A successfully downloaded origin image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    /// Media type without parameters.
    pub content_type: String,
    /// The 2xx status the origin answered with.
    pub status: StatusCode,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(FetchedImage),
    /// The origin answered 404 or redirected to an absent marker.
    Absent,
    /// The origin answered with another 4xx/5xx status.
    UpstreamStatus(StatusCode),
}

/// Settings for [`OriginFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
    pub max_redirects: usize,
    pub absent_markers: Vec<String>,
}

impl From<&OriginConfig> for FetchConfig {
    fn from(config: &OriginConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            max_bytes: config.max_fetch_bytes,
            max_redirects: config.max_redirects,
            absent_markers: config.absent_markers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OriginFetcher {
    http: Client,
    config: FetchConfig,
}

impl OriginFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .build()?;

        Ok(Self { http, config })
    }

    /// Download `url`, following at most `max_redirects` redirects.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        let mut current = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        for hop in 0..=self.config.max_redirects {
            let response = self.http.get(current.clone()).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or(FetchError::RedirectWithoutLocation)?;

                if self.is_absent_marker(location) {
                    debug!(hop, location, "redirected to absent marker");
                    return Ok(FetchOutcome::Absent);
                }

                current = resolve_location(&current, location)?;
                debug!(hop, next = %current, "following redirect");
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Ok(FetchOutcome::Absent);
            }
            if status.is_client_error() || status.is_server_error() {
                debug!(status = status.as_u16(), "origin answered with error status");
                return Ok(FetchOutcome::UpstreamStatus(status));
            }

            let header_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let bytes = self.read_capped(response).await?;
            let content_type = normalize_content_type(header_type.as_deref(), &bytes, &current);

            debug!(
                status = status.as_u16(),
                size = bytes.len(),
                content_type = %content_type,
                "fetched origin image"
            );
            return Ok(FetchOutcome::Fetched(FetchedImage {
                bytes,
                content_type,
                status,
            }));
        }

        Err(FetchError::TooManyRedirects(self.config.max_redirects))
    }

    fn is_absent_marker(&self, location: &str) -> bool {
        self.config
            .absent_markers
            .iter()
            .any(|marker| !marker.is_empty() && location.contains(marker.as_str()))
    }

    /// Read the body, failing as soon as it grows past `max_bytes`.
    async fn read_capped(&self, mut response: Response) -> Result<Bytes, FetchError> {
        let limit = self.config.max_bytes;
        if let Some(len) = response.content_length()
            && len > limit as u64
        {
            return Err(FetchError::PayloadTooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::PayloadTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

/// `scheme://host[:port]` of a URL string.
fn origin_of(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return url;
    };
    let authority_start = scheme_end + 3;
    match url[authority_start..].find('/') {
        Some(path_start) => &url[..authority_start + path_start],
        None => url,
    }
}

fn resolve_location(current: &Url, location: &str) -> Result<Url, FetchError> {
    let next = if location.starts_with('/') {
        format!("{}{}", origin_of(current.as_str()), location)
    } else {
        location.to_string()
    };
    Url::parse(&next).map_err(|_| FetchError::InvalidLocation(location.to_string()))
}

/// Media type from the header, else sniffed from the body, else guessed from the URL.
fn normalize_content_type(header: Option<&str>, body: &[u8], url: &Url) -> String {
    let raw = header
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            image::guess_format(body)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
        .or_else(|| {
            mime_guess::from_path(url.path())
                .first()
                .map(|mime| mime.essence_str().to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    match raw.split_once(';') {
        Some((essence, _)) => essence.trim().to_string(),
        None => raw,
    }
}
