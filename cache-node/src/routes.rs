use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sync_common::NodeCommunication;

use crate::cache::{CacheEngine, ReadResponse, WriteResponse};
use crate::metrics::CacheMetrics;

pub struct AppState {
    pub node_id: String,
    pub engine: Arc<CacheEngine<NodeCommunication>>,
    pub metrics: CacheMetrics,
}

#[derive(Serialize, Deserialize)]
pub struct ReadRequest {
    pub key: String,
}

#[derive(Serialize, Deserialize)]
pub struct WriteRequest {
    pub key: String,
    pub value: String,
}

#[derive(Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub key: String,
}

#[derive(Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub success: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cache/read", post(read))
        .route("/cache/write", post(write))
        .route("/cache/invalidate", post(invalidate))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn read(State(state): State<Arc<AppState>>, Json(req): Json<ReadRequest>) -> Json<ReadResponse> {
    Json(state.engine.read(&req.key).await)
}

async fn write(State(state): State<Arc<AppState>>, Json(req): Json<WriteRequest>) -> Json<WriteResponse> {
    Json(state.engine.write(&req.key, req.value).await)
}

async fn invalidate(State(state): State<Arc<AppState>>, Json(req): Json<InvalidateRequest>) -> Json<InvalidateResponse> {
    state.engine.handle_invalidate(&req.key).await;
    Json(InvalidateResponse { success: true })
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render(&state.node_id, &state.engine.snapshot())
}
