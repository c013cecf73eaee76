use async_trait::async_trait;
use raft::{AppendEntriesArgs, AppendEntriesReply, RaftTransport, RequestVoteArgs, RequestVoteReply};
use sync_common::NodeCommunication;

/// Carries raft RPCs over the node-to-node HTTP channel shared with the
/// rest of the workspace.
pub struct HttpRaftTransport {
    comm: NodeCommunication,
}

impl HttpRaftTransport {
    pub fn new(comm: NodeCommunication) -> Self {
        HttpRaftTransport { comm }
    }
}

#[async_trait]
impl RaftTransport for HttpRaftTransport {
    async fn request_vote(&self, peer_id: &str, args: RequestVoteArgs) -> Result<RequestVoteReply, String> {
        self.comm
            .send_rpc(peer_id, "/raft/request_vote", &args)
            .await
            .map_err(|err| err.to_string())
    }

    async fn append_entries(&self, peer_id: &str, args: AppendEntriesArgs) -> Result<AppendEntriesReply, String> {
        self.comm
            .send_rpc(peer_id, "/raft/append_entries", &args)
            .await
            .map_err(|err| err.to_string())
    }
}
