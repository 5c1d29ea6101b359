pub mod cache;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod origin;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod transcode;

use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn build_router(state: AppState) -> axum::Router {
    let server = &state.config.server;
    let mut router = routes::image_routes(server)
        .merge(routes::health_routes())
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = routes::cors_layer(&server.cors) {
        router = router.layer(cors);
    }

    router.with_state(state)
}
