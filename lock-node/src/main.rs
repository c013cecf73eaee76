use std::sync::{Arc, Mutex};
use std::time::Duration;

use lock_node::engine::LockEngine;
use lock_node::lock_table::LockTable;
use lock_node::metrics::LockMetrics;
use lock_node::routes::{self, AppState};
use lock_node::transport::HttpRaftTransport;
use raft::{RaftConfig, RaftNode};
use sync_common::{Config, FailureDetector, NodeCommunication};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    sync_common::logging::init();

    let config = Config::from_env().unwrap_or_else(|err| {
        log::error!("fatal configuration error: {err}. Exiting.");
        std::process::exit(1);
    });

    log::info!("starting lock node {} on term layer with {} peers", config.node_id, config.raft_peers.len());

    let comm = NodeCommunication::new(config.node_id.clone(), config.raft_peers.clone());
    let peer_ids: Vec<String> = comm.peer_ids().map(str::to_string).collect();
    let failure_detector = Mutex::new(FailureDetector::new(peer_ids.clone(), RaftConfig::default().election_timeout_max));
    let transport = Arc::new(HttpRaftTransport::new(comm));

    let lock_table = Arc::new(LockTable::new());
    let raft = RaftNode::new(config.node_id.clone(), peer_ids, transport, lock_table.clone(), RaftConfig::default());

    let engine = Arc::new(LockEngine::new(raft.clone(), lock_table));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(raft.clone().run(shutdown_rx.clone()));
    tokio::spawn(engine.clone().run_deadlock_monitor(shutdown_rx.clone()));

    let state = Arc::new(AppState {
        node_id: config.node_id.clone(),
        engine,
        metrics: LockMetrics::new(),
        failure_detector,
    });
    let app = routes::router(state);

    let port = config.listening_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|err| {
            log::error!("failed to bind port {port}: {err}. Exiting.");
            std::process::exit(1);
        });

    log::info!("lock node {} listening on {}", config.node_id, port);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
        log::info!("lock node {} shutting down", config.node_id);
    });

    if let Err(err) = server.await {
        log::error!("server error: {err}");
    }
}
