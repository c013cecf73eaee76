use std::sync::Arc;

use cache_node::cache::CacheEngine;
use cache_node::metrics::CacheMetrics;
use cache_node::routes::{self, AppState};
use sync_common::{Config, NodeCommunication};

#[tokio::main]
async fn main() {
    sync_common::logging::init();

    let config = Config::from_env().unwrap_or_else(|err| {
        log::error!("fatal configuration error: {err}. Exiting.");
        std::process::exit(1);
    });

    log::info!(
        "starting cache node {} (capacity {}) with {} mesh peers",
        config.node_id,
        config.cache_max_size,
        config.cache_peers.len()
    );

    let comm = NodeCommunication::new(config.node_id.clone(), config.cache_peers.clone());
    let main_memory = storage::connect_or_fallback(&config.redis_host).await;

    let engine = Arc::new(CacheEngine::new(config.node_id.clone(), config.cache_max_size, comm, main_memory));

    let state = Arc::new(AppState { node_id: config.node_id.clone(), engine, metrics: CacheMetrics::new() });
    let app = routes::router(state);

    let port = config.listening_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|err| {
            log::error!("failed to bind port {port}: {err}. Exiting.");
            std::process::exit(1);
        });

    log::info!("cache node {} listening on {}", config.node_id, port);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("cache node {} shutting down", config.node_id);
    });

    if let Err(err) = server.await {
        log::error!("server error: {err}");
    }
}
