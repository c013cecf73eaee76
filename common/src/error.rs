use thiserror::Error;

/// Errors raised while loading the environment-driven configuration of a node.
///
/// Any of these is fatal at startup: the binary logs the problem and exits
/// before binding a socket.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("NODE_TYPE must be one of lock|queue|cache, got {0:?}")]
    InvalidNodeType(String),

    #[error("environment variable {var} has invalid JSON: {source}")]
    InvalidJson {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("environment variable {var} has invalid value {value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors from an outbound RPC to a peer node.
#[derive(Debug, Error, Clone)]
pub enum RpcError {
    #[error("peer {0} is not known to this node")]
    UnknownPeer(String),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("peer {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}
