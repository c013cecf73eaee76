use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;

/// The role a node plays, selected by `NODE_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Lock,
    Queue,
    Cache,
}

impl NodeType {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "lock" => Ok(NodeType::Lock),
            "queue" => Ok(NodeType::Queue),
            "cache" => Ok(NodeType::Cache),
            other => Err(ConfigError::InvalidNodeType(other.to_string())),
        }
    }
}

/// Map of peer node id to its base URL, e.g. `RAFT_PEERS`/`CACHE_PEERS`.
pub type PeerMap = HashMap<String, String>;

/// Base configuration shared by every node role, loaded once at startup from
/// the process environment (`NODE_ID`, `NODE_TYPE`, peer maps, store and
/// cache sizing).
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub node_type: NodeType,
    pub raft_peers: PeerMap,
    pub cache_peers: PeerMap,
    pub queue_nodes: Vec<String>,
    pub redis_host: String,
    pub cache_max_size: usize,
}

impl Config {
    /// Loads configuration from the process environment. Any malformed or
    /// missing required variable is a fatal startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_id = required_var("NODE_ID")?;
        let node_type = NodeType::parse(&required_var("NODE_TYPE")?)?;

        Ok(Config {
            node_id,
            node_type,
            raft_peers: json_env_or_default("RAFT_PEERS", HashMap::new())?,
            cache_peers: json_env_or_default("CACHE_PEERS", HashMap::new())?,
            queue_nodes: json_env_or_default("QUEUE_NODES", Vec::new())?,
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "redis".to_string()),
            cache_max_size: cache_max_size_from_env()?,
        })
    }

    /// Base port for a role; each role gets its own reserved range.
    pub fn base_port(node_type: NodeType) -> u16 {
        match node_type {
            NodeType::Lock => 8000,
            NodeType::Queue => 8010,
            NodeType::Cache => 8020,
        }
    }

    /// Listening port derived from `NODE_ID`'s trailing digits, falling back
    /// to `base + 1` when the id carries no numeric suffix.
    pub fn listening_port(&self) -> u16 {
        port_from_node_id(&self.node_id, Self::base_port(self.node_type))
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn json_env_or_default<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => {
            serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidJson { var: name, source })
        }
        _ => Ok(default),
    }
}

fn cache_max_size_from_env() -> Result<usize, ConfigError> {
    match std::env::var("CACHE_MAX_SIZE") {
        Ok(raw) if !raw.is_empty() => raw.parse::<usize>().map_err(|source| ConfigError::InvalidValue {
            var: "CACHE_MAX_SIZE",
            value: raw,
            reason: source.to_string(),
        }),
        _ => Ok(100),
    }
}

fn port_from_node_id(node_id: &str, base_port: u16) -> u16 {
    node_id
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse::<u16>().ok())
        .map(|n| base_port + n)
        .unwrap_or(base_port + 1)
}
