//! Drives two queue-node HTTP servers sharing one backing store, the way a
//! real deployment shards topics across shard peers that all point at the
//! same external key-value store.

use std::sync::Arc;

use hashring::ConsistentHashRing;
use queue_node::engine::{AckRequest, ConsumeRequest, PublishRequest, QueueEngine, QueueResponse, QueueStatus};
use queue_node::metrics::QueueMetrics;
use queue_node::routes::{self, AppState};
use storage::{InMemoryStore, KeyValueStore};

struct Node {
    base_url: String,
    client: reqwest::Client,
    engine: Arc<QueueEngine>,
}

async fn spawn_node(node_id: &str, ring: ConsistentHashRing, store: Arc<dyn KeyValueStore>) -> Node {
    let engine = Arc::new(QueueEngine::new(node_id.to_string(), ring, store));
    let state = Arc::new(AppState { node_id: node_id.to_string(), engine: engine.clone(), metrics: QueueMetrics::new() });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Node { base_url: format!("http://{addr}"), client: reqwest::Client::new(), engine }
}

async fn cluster() -> (Node, Node, String) {
    let nodes = vec!["q1".to_string(), "q2".to_string()];
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());

    let q1 = spawn_node("q1", ConsistentHashRing::new(&nodes), store.clone()).await;
    let q2 = spawn_node("q2", ConsistentHashRing::new(&nodes), store).await;

    let owner = ConsistentHashRing::new(&nodes).owner("orders").unwrap().to_string();
    (q1, q2, owner)
}

impl Node {
    async fn publish(&self, topic: &str) -> QueueResponse {
        self.client
            .post(format!("{}/queue/publish", self.base_url))
            .json(&PublishRequest { topic: topic.to_string(), data: serde_json::json!({"amount": 42}) })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn consume(&self, topic: &str) -> QueueResponse {
        self.client
            .post(format!("{}/queue/consume", self.base_url))
            .json(&ConsumeRequest { topic: topic.to_string() })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn ack(&self, topic: &str, message_id: &str) -> QueueResponse {
        self.client
            .post(format!("{}/queue/ack", self.base_url))
            .json(&AckRequest { topic: topic.to_string(), message_id: message_id.to_string() })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn publish_to_the_non_owner_redirects_to_the_ring_owner() {
    let (q1, q2, owner) = cluster().await;

    let non_owner = if owner == "q1" { &q2 } else { &q1 };
    let response = non_owner.publish("orders").await;

    assert_eq!(response.status, QueueStatus::Redirect);
    assert_eq!(response.node.as_deref(), Some(owner.as_str()));
}

#[tokio::test]
async fn publish_consume_ack_round_trip_over_http() {
    let (q1, q2, owner) = cluster().await;
    let owning_node = if owner == "q1" { &q1 } else { &q2 };

    let published = owning_node.publish("orders").await;
    assert_eq!(published.status, QueueStatus::Success);
    let id = published.message_id.unwrap();

    let consumed = owning_node.consume("orders").await;
    assert_eq!(consumed.status, QueueStatus::MessageSent);
    assert_eq!(consumed.message.unwrap().id, id);

    let ack = owning_node.ack("orders", &id).await;
    assert_eq!(ack.status, QueueStatus::AckReceived);

    let second_ack = owning_node.ack("orders", &id).await;
    assert_eq!(second_ack.status, QueueStatus::AckNotFound);
}

#[tokio::test]
async fn an_unacknowledged_message_is_redelivered_after_it_goes_stale() {
    let (q1, q2, owner) = cluster().await;
    let owning_node = if owner == "q1" { &q1 } else { &q2 };

    let published = owning_node.publish("orders").await;
    let id = published.message_id.unwrap();
    owning_node.consume("orders").await;

    // Backdate the pending entry's sent_time so the redelivery pass treats
    // it as overdue without the test waiting out the real timeout.
    let meta_key = "pending_q:orders_meta";
    let stale = serde_json::json!({
        "id": id, "timestamp": 0.0, "data": {"amount": 42}, "topic": "orders", "sent_time": 0.0,
    });
    owning_node.engine.store().hset(meta_key, &id, &stale.to_string()).await.unwrap();

    owning_node.engine.run_redelivery_pass().await;

    let redelivered = owning_node.consume("orders").await;
    assert_eq!(redelivered.status, QueueStatus::MessageSent);
    assert_eq!(redelivered.message.unwrap().id, id);
}
