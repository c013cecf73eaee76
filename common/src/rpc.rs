use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::PeerMap;
use crate::error::RpcError;

/// Default per-peer RPC timeout applied to every inter-node call.
pub const RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Point-to-point and broadcast JSON RPC to peer nodes over HTTP.
///
/// Every engine (raft replication, cache mesh) that needs to talk to peers
/// holds one of these, built from its role's peer map (`RAFT_PEERS` /
/// `CACHE_PEERS`). Failures never panic or propagate as exceptions: callers
/// get a `Result` and are expected to retry on the next heartbeat/monitor
/// tick.
#[derive(Clone)]
pub struct NodeCommunication {
    node_id: String,
    peers: PeerMap,
    client: reqwest::Client,
}

impl NodeCommunication {
    pub fn new(node_id: impl Into<String>, peers: PeerMap) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("reqwest client builds with a default TLS backend");

        NodeCommunication {
            node_id: node_id.into(),
            peers,
            client,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(|s| s.as_str())
    }

    /// Sends a single JSON RPC to `target_id` at `endpoint`, returning the
    /// decoded response body.
    pub async fn send_rpc<Req, Resp>(
        &self,
        target_id: &str,
        endpoint: &str,
        payload: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let base = self
            .peers
            .get(target_id)
            .ok_or_else(|| RpcError::UnknownPeer(target_id.to_string()))?;
        let url = format!("{base}{endpoint}");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RpcError::Timeout { url: url.clone() }
                } else {
                    RpcError::Transport {
                        url: url.clone(),
                        message: err.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        response.json::<Resp>().await.map_err(|err| RpcError::Decode {
            url,
            message: err.to_string(),
        })
    }

    /// Sends the same JSON RPC to every known peer (excluding self by
    /// default), in parallel, collecting each peer's result independently -
    /// one peer failing never prevents the others from being tried.
    pub async fn broadcast_rpc<Req, Resp>(
        &self,
        endpoint: &str,
        payload: &Req,
        exclude_self: bool,
    ) -> HashMap<String, Result<Resp, RpcError>>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let targets: Vec<&str> = self
            .peers
            .keys()
            .map(|s| s.as_str())
            .filter(|id| !(exclude_self && *id == self.node_id))
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|target| self.send_rpc::<Req, Resp>(target, endpoint, payload)),
        )
        .await;

        targets
            .into_iter()
            .map(str::to_string)
            .zip(results)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_rpc_to_unknown_peer_is_rejected_locally() {
        let comm = NodeCommunication::new("self", PeerMap::new());
        let result = comm
            .send_rpc::<_, serde_json::Value>("ghost", "/cache/invalidate", &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(RpcError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn broadcast_with_no_peers_returns_empty_map() {
        let comm = NodeCommunication::new("self", PeerMap::new());
        let results = comm
            .broadcast_rpc::<_, serde_json::Value>("/cache/invalidate", &serde_json::json!({}), true)
            .await;
        assert!(results.is_empty());
    }
}
