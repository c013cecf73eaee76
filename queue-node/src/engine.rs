//! The queue engine's request handlers: routing by the consistent-hash
//! ring, then publish/consume/ack against the external key-value store.
//! Stateless per request - everything durable lives in the store.

use std::sync::Arc;
use std::time::Duration;

use hashring::ConsistentHashRing;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use storage::{models::now_seconds, KeyValueStore};
use tokio::sync::watch;

const QUEUE_PREFIX: &str = "q:";
const PENDING_PREFIX: &str = "pending_q:";
const META_SUFFIX: &str = "_meta";

/// Messages are redelivered to the main queue once their pending entry has
/// sat unacknowledged longer than this.
pub const REDELIVERY_TIMEOUT_SECS: f64 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: f64,
    pub data: serde_json::Value,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Success,
    Redirect,
    NoMessage,
    MessageSent,
    AckReceived,
    AckNotFound,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse {
    pub status: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckRequest {
    pub topic: String,
    pub message_id: String,
}

pub struct QueueEngine {
    node_id: String,
    ring: ConsistentHashRing,
    store: Arc<dyn KeyValueStore>,
}

impl QueueEngine {
    pub fn new(node_id: String, ring: ConsistentHashRing, store: Arc<dyn KeyValueStore>) -> Self {
        QueueEngine { node_id, ring, store }
    }

    /// The backing key-value store, exposed for operational tooling and
    /// integration tests that need to inspect or seed state directly.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    fn owner_redirect(&self, topic: &str) -> Option<QueueResponse> {
        match self.ring.owner(topic) {
            None => Some(QueueResponse {
                status: QueueStatus::Failure,
                node: None,
                message_id: None,
                message: None,
                error: Some("no nodes available".to_string()),
            }),
            Some(owner) if owner != self.node_id => Some(QueueResponse {
                status: QueueStatus::Redirect,
                node: Some(owner.to_string()),
                message_id: None,
                message: None,
                error: None,
            }),
            Some(_) => None,
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> QueueResponse {
        if let Some(redirect) = self.owner_redirect(&request.topic) {
            return redirect;
        }

        let message_id = message_id(&request.topic, now_seconds());
        let message = Message {
            id: message_id.clone(),
            timestamp: now_seconds(),
            data: request.data,
            topic: request.topic.clone(),
            sent_time: None,
        };

        let serialized = serde_json::to_string(&message).expect("message always serializes");
        if let Err(err) = self.store.rpush(&queue_key(&request.topic), &serialized).await {
            log::warn!("publish to {} failed: {err}", request.topic);
            return QueueResponse {
                status: QueueStatus::Failure,
                node: None,
                message_id: None,
                message: None,
                error: Some(err.to_string()),
            };
        }

        log::info!("queue {}: published {} to topic {}", self.node_id, message_id, request.topic);
        QueueResponse {
            status: QueueStatus::Success,
            node: Some(self.node_id.clone()),
            message_id: Some(message_id),
            message: None,
            error: None,
        }
    }

    pub async fn consume(&self, request: ConsumeRequest) -> QueueResponse {
        if let Some(redirect) = self.owner_redirect(&request.topic) {
            return redirect;
        }

        let queue_key = queue_key(&request.topic);
        let pending_key = pending_key(&request.topic);
        let meta_key = meta_key(&request.topic);

        let moved = match self.store.rpoplpush(&queue_key, &pending_key).await {
            Ok(moved) => moved,
            Err(err) => {
                log::warn!("consume from {} failed: {err}", request.topic);
                return QueueResponse {
                    status: QueueStatus::Failure,
                    node: None,
                    message_id: None,
                    message: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let Some(raw) = moved else {
            return QueueResponse { status: QueueStatus::NoMessage, node: None, message_id: None, message: None, error: None };
        };

        let mut message: Message = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("dropping unparseable message on topic {}: {err}", request.topic);
                return QueueResponse {
                    status: QueueStatus::Failure,
                    node: None,
                    message_id: None,
                    message: None,
                    error: Some(err.to_string()),
                };
            }
        };
        message.sent_time = Some(now_seconds());

        // The pending-list entry still holds `raw` (no sent_time); swap it
        // for the stamped serialization so the list entry and the meta-hash
        // value are byte-identical - acknowledge and the redelivery scan
        // both remove a pending entry by matching this exact string.
        let serialized = serde_json::to_string(&message).expect("message always serializes");
        if let Err(err) = self.store.lrem_one(&pending_key, &raw).await {
            log::warn!("failed to swap pending entry for {}: {err}", message.id);
        }
        if let Err(err) = self.store.lpush(&pending_key, &serialized).await {
            log::warn!("failed to re-push stamped pending entry for {}: {err}", message.id);
        }
        if let Err(err) = self.store.hset(&meta_key, &message.id, &serialized).await {
            log::warn!("failed to record pending metadata for {}: {err}", message.id);
        }

        log::info!("queue {}: delivered {} for topic {}", self.node_id, message.id, request.topic);
        QueueResponse { status: QueueStatus::MessageSent, node: None, message_id: None, message: Some(message), error: None }
    }

    pub async fn acknowledge(&self, request: AckRequest) -> QueueResponse {
        let pending_key = pending_key(&request.topic);
        let meta_key = meta_key(&request.topic);

        let serialized = match self.store.hget(&meta_key, &request.message_id).await {
            Ok(value) => value,
            Err(err) => {
                log::warn!("ack lookup for {} failed: {err}", request.message_id);
                return QueueResponse {
                    status: QueueStatus::Failure,
                    node: None,
                    message_id: None,
                    message: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let deleted = self.store.hdel(&meta_key, &request.message_id).await.unwrap_or(false);

        if let (true, Some(serialized)) = (deleted, serialized) {
            if let Err(err) = self.store.lrem_one(&pending_key, &serialized).await {
                log::warn!("failed to remove {} from pending list: {err}", request.message_id);
            }
            return QueueResponse {
                status: QueueStatus::AckReceived,
                node: None,
                message_id: Some(request.message_id),
                message: None,
                error: None,
            };
        }

        QueueResponse { status: QueueStatus::AckNotFound, node: None, message_id: None, message: None, error: None }
    }

    /// Scans pending metadata for topics this node owns and returns
    /// overdue entries (`sent_time` older than [`REDELIVERY_TIMEOUT_SECS`])
    /// to the main queue. Idempotent: once an entry's metadata is moved
    /// away by the first successful scan, later scans no longer see it.
    pub async fn run_redelivery_pass(&self) {
        let meta_keys = match self.store.scan_hash_keys(PENDING_PREFIX, META_SUFFIX).await {
            Ok(keys) => keys,
            Err(err) => {
                log::warn!("redelivery scan failed: {err}");
                return;
            }
        };

        for meta_key in meta_keys {
            let Some(topic) = topic_from_meta_key(&meta_key) else { continue };

            if self.ring.owner(&topic) != Some(self.node_id.as_str()) {
                continue;
            }

            let pending_key = pending_key(&topic);
            let entries = match self.store.hgetall(&meta_key).await {
                Ok(entries) => entries,
                Err(err) => {
                    log::warn!("redelivery read for topic {topic} failed: {err}");
                    continue;
                }
            };

            let now = now_seconds();
            for (message_id, serialized) in entries {
                let sent_time = serde_json::from_str::<Message>(&serialized).ok().and_then(|m| m.sent_time).unwrap_or(0.0);
                if now - sent_time <= REDELIVERY_TIMEOUT_SECS {
                    continue;
                }

                log::info!("queue {}: redelivering {message_id} for topic {topic} due to timeout", self.node_id);
                if let Err(err) = self.store.lpush(&queue_key(&topic), &serialized).await {
                    log::warn!("redelivery lpush for {message_id} failed: {err}");
                    continue;
                }
                let _ = self.store.hdel(&meta_key, &message_id).await;
                let _ = self.store.lrem_one(&pending_key, &serialized).await;
            }
        }
    }

    /// Runs the redelivery scan on a fixed cadence until shutdown.
    pub async fn run_redelivery_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs_f64(REDELIVERY_TIMEOUT_SECS / 3.0);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            self.run_redelivery_pass().await;
        }
    }
}

fn queue_key(topic: &str) -> String {
    format!("{QUEUE_PREFIX}{topic}")
}

fn pending_key(topic: &str) -> String {
    format!("{PENDING_PREFIX}{topic}")
}

fn meta_key(topic: &str) -> String {
    format!("{}{}", pending_key(topic), META_SUFFIX)
}

fn topic_from_meta_key(meta_key: &str) -> Option<String> {
    meta_key.strip_prefix(PENDING_PREFIX)?.strip_suffix(META_SUFFIX).map(str::to_string)
}

fn message_id(topic: &str, now: f64) -> String {
    let digest = Sha1::digest(format!("{topic}-{now}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect::<String>()[..10].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::InMemoryStore;

    fn engine(node_id: &str, nodes: &[&str]) -> QueueEngine {
        let nodes: Vec<String> = nodes.iter().map(|s| s.to_string()).collect();
        QueueEngine::new(node_id.to_string(), ConsistentHashRing::new(&nodes), Arc::new(InMemoryStore::new()))
    }

    fn owning_engine(topic: &str) -> QueueEngine {
        let nodes = ["q1", "q2", "q3"];
        let ring = ConsistentHashRing::new(&nodes.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        let owner = ring.owner(topic).unwrap().to_string();
        engine(&owner, &nodes)
    }

    #[tokio::test]
    async fn non_owner_redirects() {
        let nodes = ["q1", "q2", "q3"];
        let ring = ConsistentHashRing::new(&nodes.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        let owner = ring.owner("orders").unwrap().to_string();
        let non_owner = nodes.iter().find(|&&n| n != owner).unwrap();
        let engine = engine(non_owner, &nodes);

        let response = engine.publish(PublishRequest { topic: "orders".to_string(), data: serde_json::json!({"k": 1}) }).await;
        assert!(matches!(response.status, QueueStatus::Redirect));
        assert_eq!(response.node.as_deref(), Some(owner.as_str()));
    }

    #[tokio::test]
    async fn publish_consume_ack_round_trip() {
        let engine = owning_engine("orders");

        let published = engine.publish(PublishRequest { topic: "orders".to_string(), data: serde_json::json!({"k": 1}) }).await;
        assert!(matches!(published.status, QueueStatus::Success));
        let id = published.message_id.unwrap();

        let consumed = engine.consume(ConsumeRequest { topic: "orders".to_string() }).await;
        assert!(matches!(consumed.status, QueueStatus::MessageSent));
        assert_eq!(consumed.message.unwrap().id, id);

        let ack = engine.acknowledge(AckRequest { topic: "orders".to_string(), message_id: id.clone() }).await;
        assert!(matches!(ack.status, QueueStatus::AckReceived));

        let second_ack = engine.acknowledge(AckRequest { topic: "orders".to_string(), message_id: id }).await;
        assert!(matches!(second_ack.status, QueueStatus::AckNotFound));
    }

    #[tokio::test]
    async fn acknowledge_removes_the_pending_list_entry_it_stamped_on_consume() {
        let engine = owning_engine("orders");
        let published = engine.publish(PublishRequest { topic: "orders".to_string(), data: serde_json::json!({"k": 1}) }).await;
        let id = published.message_id.unwrap();
        engine.consume(ConsumeRequest { topic: "orders".to_string() }).await;

        let ack = engine.acknowledge(AckRequest { topic: "orders".to_string(), message_id: id }).await;
        assert!(matches!(ack.status, QueueStatus::AckReceived));

        // consume() re-stamps the popped message with sent_time before
        // storing it as pending-list metadata; acknowledge must remove the
        // exact stamped copy, not the pre-stamp string it was popped as, or
        // the pending list leaks an entry on every ack.
        let leftover = engine.store.rpoplpush(&pending_key("orders"), "scratch").await.unwrap();
        assert!(leftover.is_none(), "pending list retained a leftover entry after ack: {leftover:?}");
    }

    #[tokio::test]
    async fn consume_on_empty_topic_returns_no_message() {
        let engine = owning_engine("orders");
        let consumed = engine.consume(ConsumeRequest { topic: "orders".to_string() }).await;
        assert!(matches!(consumed.status, QueueStatus::NoMessage));
    }

    #[tokio::test]
    async fn redelivery_pass_returns_overdue_messages_to_main() {
        let engine = owning_engine("orders");
        let published = engine.publish(PublishRequest { topic: "orders".to_string(), data: serde_json::json!({"k": 1}) }).await;
        let id = published.message_id.unwrap();
        engine.consume(ConsumeRequest { topic: "orders".to_string() }).await;

        // Force the pending metadata's sent_time far enough into the past
        // that the redelivery pass treats it as overdue.
        let meta_key = meta_key("orders");
        let stale = serde_json::json!({
            "id": id,
            "timestamp": 0.0,
            "data": {"k": 1},
            "topic": "orders",
            "sent_time": 0.0,
        });
        engine.store.hset(&meta_key, &id, &stale.to_string()).await.unwrap();

        engine.run_redelivery_pass().await;

        let consumed_again = engine.consume(ConsumeRequest { topic: "orders".to_string() }).await;
        assert!(matches!(consumed_again.status, QueueStatus::MessageSent));
        assert_eq!(consumed_again.message.unwrap().id, id);
    }
}
