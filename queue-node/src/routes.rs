use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::engine::{AckRequest, ConsumeRequest, PublishRequest, QueueEngine, QueueResponse};
use crate::metrics::QueueMetrics;

pub struct AppState {
    pub node_id: String,
    pub engine: Arc<QueueEngine>,
    pub metrics: QueueMetrics,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/queue/publish", post(publish))
        .route("/queue/consume", post(consume))
        .route("/queue/ack", post(ack))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn publish(State(state): State<Arc<AppState>>, Json(req): Json<PublishRequest>) -> Json<QueueResponse> {
    Json(state.engine.publish(req).await)
}

async fn consume(State(state): State<Arc<AppState>>, Json(req): Json<ConsumeRequest>) -> Json<QueueResponse> {
    Json(state.engine.consume(req).await)
}

async fn ack(State(state): State<Arc<AppState>>, Json(req): Json<AckRequest>) -> Json<QueueResponse> {
    Json(state.engine.acknowledge(req).await)
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render(&state.node_id)
}
