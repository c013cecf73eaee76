//! Shared substrate for the three node roles: environment-driven
//! configuration, peer RPC, failure detection, metrics exposition and
//! logging setup.

pub mod config;
pub mod error;
pub mod failure_detector;
pub mod logging;
pub mod metrics;
pub mod rpc;

pub use config::{Config, NodeType, PeerMap};
pub use error::{ConfigError, RpcError};
pub use failure_detector::FailureDetector;
pub use metrics::MetricsSnapshot;
pub use rpc::NodeCommunication;
