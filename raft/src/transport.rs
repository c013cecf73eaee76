use async_trait::async_trait;

use crate::message::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};

/// Outbound replication RPCs a [`RaftNode`](crate::node::RaftNode) issues to
/// its peers. The node binaries implement this over HTTP via
/// `sync_common::NodeCommunication`; the raft crate itself knows nothing
/// about transport.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(&self, peer_id: &str, args: RequestVoteArgs) -> Result<RequestVoteReply, String>;

    async fn append_entries(&self, peer_id: &str, args: AppendEntriesArgs) -> Result<AppendEntriesReply, String>;
}
