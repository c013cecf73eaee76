use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use raft::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use sync_common::FailureDetector;

use crate::engine::{AcquireRequest, AcquireResponse, LockEngine, ReleaseRequest, ReleaseResponse};
use crate::metrics::LockMetrics;

pub struct AppState {
    pub node_id: String,
    pub engine: Arc<LockEngine>,
    pub metrics: LockMetrics,
    pub failure_detector: Mutex<FailureDetector>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/raft/request_vote", post(request_vote))
        .route("/raft/append_entries", post(append_entries))
        .route("/lock/acquire", post(acquire))
        .route("/lock/release", post(release))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn request_vote(
    State(state): State<Arc<AppState>>,
    Json(args): Json<RequestVoteArgs>,
) -> Json<RequestVoteReply> {
    state.failure_detector.lock().unwrap().record_heartbeat(&args.candidate_id);
    Json(state.engine.raft().handle_request_vote(args).await)
}

async fn append_entries(
    State(state): State<Arc<AppState>>,
    Json(args): Json<AppendEntriesArgs>,
) -> Json<AppendEntriesReply> {
    state.failure_detector.lock().unwrap().set_leader(args.leader_id.clone());
    Json(state.engine.raft().handle_append_entries(args).await)
}

async fn acquire(State(state): State<Arc<AppState>>, Json(req): Json<AcquireRequest>) -> Json<AcquireResponse> {
    Json(state.engine.acquire(req).await)
}

async fn release(State(state): State<Arc<AppState>>, Json(req): Json<ReleaseRequest>) -> Json<ReleaseResponse> {
    Json(state.engine.release(req).await)
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    let detector = state.failure_detector.lock().unwrap();
    state.metrics.render(&state.node_id, state.engine.raft(), &detector)
}
