use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use common::Reference;
use common::storage::IMMUTABLE_CACHE_CONTROL;
use tokio_util::io::ReaderStream;
use tracing::instrument;

use crate::error::AppError;
use crate::pipeline::{ImageBody, ImageResponse};
use crate::state::AppState;

pub const SOURCE_HEADER: &str = "x-source";
pub const LATENCY_HEADER: &str = "x-req-ms";

/// Serve `/{type}/{id}/{hash}[@resize]`.
#[instrument(skip(state, headers))]
pub async fn serve_image(
    State(state): State<AppState>,
    Path((entity, id, compound)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let started = Instant::now();

    let reference = Reference::parse(&entity, &id, &compound, &state.config.resize.policy)?;
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    let image = state.pipeline.serve(&reference, if_none_match).await?;
    tracing::info!(
        status = image.status.as_u16(),
        source = %image.provenance,
        "image served"
    );

    build_response(image, started)
}

fn build_response(image: ImageResponse, started: Instant) -> Result<Response, AppError> {
    let elapsed_ms = started.elapsed().as_micros() as f64 / 1000.0;

    let mut builder = Response::builder()
        .status(image.status)
        .header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)
        .header(header::ETAG, format!("\"{}\"", image.validator))
        .header(SOURCE_HEADER, image.provenance.to_string())
        .header(LATENCY_HEADER, format!("{elapsed_ms:.2}"));

    if let Ok(content_type) = HeaderValue::from_str(&image.content_type) {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    if image.status != StatusCode::NOT_MODIFIED
        && let Some(length) = image.content_length
    {
        builder = builder.header(header::CONTENT_LENGTH, length.to_string());
    }

    let body = match image.body {
        ImageBody::Empty => Body::empty(),
        ImageBody::Bytes(bytes) => Body::from(bytes),
        ImageBody::Stream(reader) => Body::from_stream(ReaderStream::new(reader)),
    };

    builder
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
