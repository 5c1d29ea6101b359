use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::get,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::{CorsConfig, ServerConfig};
use crate::handlers;
use crate::state::AppState;

/// Image route mounted below the configured path prefix.
pub fn image_routes(config: &ServerConfig) -> Router<AppState> {
    let route = format!("{}/{{type}}/{{id}}/{{hash}}", normalize_prefix(&config.path_prefix));
    Router::new().route(&route, get(handlers::image::serve_image))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/readyz", get(handlers::health::readyz))
}

/// `"sss/"` becomes `"/sss"`; empty and `"/"` mount at the root.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// CORS layer for the configured origins, or `None` when none are allowed.
pub fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if config.allow_origins.is_empty() {
        return None;
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::IF_NONE_MATCH])
        .expose_headers([
            header::ETAG,
            HeaderName::from_static(handlers::image::SOURCE_HEADER),
            HeaderName::from_static(handlers::image::LATENCY_HEADER),
        ])
        .max_age(Duration::from_secs(config.max_age));

    if config.allow_origins.iter().any(|o| o == "*") {
        return Some(cors.allow_origin(Any));
    }

    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(cors.allow_origin(AllowOrigin::list(origins)))
}
