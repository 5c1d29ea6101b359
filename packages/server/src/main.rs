use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use server::cache::open_object_store;
use server::config::AppConfig;
use server::database::init_db;
use server::pipeline::ImagePipeline;
use server::routes::normalize_prefix;
use server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = init_db(&config.database)
        .await
        .context("Failed to connect to the record store")?;
    info!(
        max_connections = config.database.max_connections,
        "Record store connected"
    );

    let store = open_object_store(&config.storage)
        .await
        .context("Failed to open object store")?;
    info!(backend = ?config.storage.backend, prefix = %config.storage.prefix, "Object store ready");

    let pipeline = ImagePipeline::from_config(&config, db, store)
        .context("Failed to build origin client")?;
    info!(mode = ?config.upload.mode, "Upload scheduler ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let mount = normalize_prefix(&config.server.path_prefix);

    let state = AppState {
        config: Arc::new(config),
        pipeline: Arc::new(pipeline),
    };
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Serving images at http://{}{}/{{type}}/{{id}}/{{hash}}", addr, mount);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
