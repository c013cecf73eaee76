use std::sync::Arc;
use std::time::Instant;

use raft::RaftNode;
use sync_common::{FailureDetector, MetricsSnapshot};

use crate::lock_table::LockTable;

pub struct LockMetrics {
    started_at: Instant,
}

impl LockMetrics {
    pub fn new() -> Self {
        LockMetrics { started_at: Instant::now() }
    }

    pub fn render(&self, node_id: &str, raft: &Arc<RaftNode<LockTable>>, detector: &FailureDetector) -> String {
        let mut snapshot = MetricsSnapshot::new()
            .info(
                "raft_state_info",
                vec![("node_id", node_id.to_string()), ("raft_state", raft.role_str().to_string())],
            )
            .gauge("raft_is_leader", if raft.is_leader() { 1.0 } else { 0.0 })
            .gauge("raft_current_term", raft.current_term() as f64)
            .gauge("raft_commit_index", raft.commit_index() as f64)
            .gauge("uptime_seconds", self.started_at.elapsed().as_secs_f64())
            .gauge("leader_looks_down", if detector.leader_looks_down() { 1.0 } else { 0.0 });

        if let Some(since) = detector.time_since_leader_contact() {
            snapshot = snapshot.gauge("leader_last_contact_seconds", since.as_secs_f64());
        }

        snapshot.render()
    }
}

impl Default for LockMetrics {
    fn default() -> Self {
        Self::new()
    }
}
