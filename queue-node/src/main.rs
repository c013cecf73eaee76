use std::sync::Arc;

use hashring::ConsistentHashRing;
use queue_node::engine::QueueEngine;
use queue_node::metrics::QueueMetrics;
use queue_node::routes::{self, AppState};
use sync_common::Config;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    sync_common::logging::init();

    let config = Config::from_env().unwrap_or_else(|err| {
        log::error!("fatal configuration error: {err}. Exiting.");
        std::process::exit(1);
    });

    log::info!("starting queue node {} with {} shard peers", config.node_id, config.queue_nodes.len());

    let ring = ConsistentHashRing::new(&config.queue_nodes);
    let store = storage::connect_or_fallback(&config.redis_host).await;

    let engine = Arc::new(QueueEngine::new(config.node_id.clone(), ring, store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(engine.clone().run_redelivery_monitor(shutdown_rx));

    let state = Arc::new(AppState { node_id: config.node_id.clone(), engine, metrics: QueueMetrics::new() });
    let app = routes::router(state);

    let port = config.listening_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|err| {
            log::error!("failed to bind port {port}: {err}. Exiting.");
            std::process::exit(1);
        });

    log::info!("queue node {} listening on {}", config.node_id, port);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
        log::info!("queue node {} shutting down", config.node_id);
    });

    if let Err(err) = server.await {
        log::error!("server error: {err}");
    }
}
