//! Drives a single lock node over real HTTP: binds a real socket, spawns the
//! router on it, and talks to it with a real client.

use std::sync::Arc;
use std::time::Duration;

use lock_node::engine::{AcquireRequest, AcquireResponse, LockEngine, ReleaseRequest, ReleaseResponse};
use lock_node::lock_table::LockTable;
use lock_node::metrics::LockMetrics;
use lock_node::routes::{self, AppState};
use lock_node::transport::HttpRaftTransport;
use raft::{RaftConfig, RaftNode};
use sync_common::{FailureDetector, NodeCommunication};
use tokio::sync::watch;

struct Harness {
    base_url: String,
    client: reqwest::Client,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn spawn() -> Self {
        let comm = NodeCommunication::new("lock_1", Default::default());
        let transport = Arc::new(HttpRaftTransport::new(comm));
        let lock_table = Arc::new(LockTable::new());

        // A single-node cluster (no peers) becomes leader on its first
        // election timeout; shrink the timers so the test doesn't wait
        // on the 1-2.5s production defaults.
        let fast_config = RaftConfig {
            heartbeat_interval: Duration::from_millis(10),
            election_timeout_min: Duration::from_millis(20),
            election_timeout_max: Duration::from_millis(50),
        };
        let raft = RaftNode::new("lock_1".to_string(), vec![], transport, lock_table.clone(), fast_config);
        let engine = Arc::new(LockEngine::new(raft.clone(), lock_table));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(raft.clone().run(shutdown_rx.clone()));
        tokio::spawn(engine.clone().run_deadlock_monitor(shutdown_rx));

        let state = Arc::new(AppState {
            node_id: "lock_1".to_string(),
            engine,
            metrics: LockMetrics::new(),
            failure_detector: std::sync::Mutex::new(FailureDetector::new(vec![], Duration::from_secs(5))),
        });
        let app = routes::router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        // Wait for the node to elect itself leader before issuing requests.
        for _ in 0..50 {
            if raft.is_leader() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(raft.is_leader(), "lock node never elected itself leader");

        Harness { base_url: format!("http://{addr}"), client: reqwest::Client::new(), _shutdown: shutdown_tx }
    }

    async fn acquire(&self, lock_name: &str, client_id: &str, timeout: f64) -> AcquireResponse {
        self.client
            .post(format!("{}/lock/acquire", self.base_url))
            .json(&AcquireRequest { lock_name: lock_name.to_string(), lock_type: lock_table_exclusive(), client_id: client_id.to_string(), timeout })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn release(&self, lock_name: &str, client_id: &str) -> ReleaseResponse {
        self.client
            .post(format!("{}/lock/release", self.base_url))
            .json(&ReleaseRequest { lock_name: lock_name.to_string(), client_id: client_id.to_string() })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

fn lock_table_exclusive() -> lock_node::lock_table::LockType {
    lock_node::lock_table::LockType::Exclusive
}

#[tokio::test]
async fn exclusive_lock_contention_then_release_regrants() {
    let harness = Harness::spawn().await;

    let granted = harness.acquire("R", "alice", 5.0).await;
    assert!(granted.success);

    // bob contends for the same exclusive lock with a short wait budget;
    // alice is still holding it, so bob must time out rather than be granted.
    let denied = harness.acquire("R", "bob", 0.3).await;
    assert!(!denied.success);

    let released = harness.release("R", "alice").await;
    assert!(released.success);

    let regranted = harness.acquire("R", "bob", 2.0).await;
    assert!(regranted.success);
}

#[tokio::test]
async fn expired_lock_is_force_released_by_the_deadlock_monitor() {
    let harness = Harness::spawn().await;

    let granted = harness.acquire("R2", "alice", 0.3).await;
    assert!(granted.success);

    // alice never releases; the deadlock monitor's 0.5-1s sweep should
    // force the expired record away on its own.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let regranted = harness.acquire("R2", "bob", 2.0).await;
    assert!(regranted.success, "bob should acquire once the monitor reclaims the expired lock");
}

#[tokio::test]
async fn shared_locks_can_be_held_concurrently() {
    let harness = Harness::spawn().await;

    let a = harness
        .client
        .post(format!("{}/lock/acquire", harness.base_url))
        .json(&AcquireRequest { lock_name: "S".to_string(), lock_type: lock_node::lock_table::LockType::Shared, client_id: "alice".to_string(), timeout: 2.0 })
        .send()
        .await
        .unwrap()
        .json::<AcquireResponse>()
        .await
        .unwrap();
    assert!(a.success);

    let b = harness
        .client
        .post(format!("{}/lock/acquire", harness.base_url))
        .json(&AcquireRequest { lock_name: "S".to_string(), lock_type: lock_node::lock_table::LockType::Shared, client_id: "bob".to_string(), timeout: 2.0 })
        .send()
        .await
        .unwrap()
        .json::<AcquireResponse>()
        .await
        .unwrap();
    assert!(b.success, "two shared holders should coexist on the same lock");
}

#[tokio::test]
async fn metrics_endpoint_reports_leader_state() {
    let harness = Harness::spawn().await;

    let body = harness
        .client
        .get(format!("{}/metrics", harness.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("raft_is_leader 1"), "single-node cluster should report itself as leader: {body}");
    assert!(body.contains("raft_state=\"leader\""));
}
