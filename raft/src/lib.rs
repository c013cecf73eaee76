//! Leader election and log replication, independent of what the replicated
//! commands mean. A bound [`StateMachine`] interprets committed entries;
//! everything in this crate only has to agree on their order.

pub mod config;
pub mod log;
pub mod message;
pub mod node;
pub mod state_machine;
pub mod transport;

pub use config::RaftConfig;
pub use message::{AppendEntriesArgs, AppendEntriesReply, LogEntry, RequestVoteArgs, RequestVoteReply, Role};
pub use node::{RaftNode, SubmitError};
pub use state_machine::{NoopStateMachine, StateMachine};
pub use transport::RaftTransport;
