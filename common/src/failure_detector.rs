use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks last-contact times for a node's peers.
///
/// Used by the lock cluster to notice a dead-looking leader for
/// diagnostics/metrics; the authoritative election-timeout logic in
/// [`raft`](../raft/index.html) is independent of this detector.
pub struct FailureDetector {
    peer_ids: Vec<String>,
    last_seen: HashMap<String, Instant>,
    leader_timeout: Duration,
    leader_id: Option<String>,
}

impl FailureDetector {
    pub fn new(peer_ids: Vec<String>, leader_timeout: Duration) -> Self {
        let now = Instant::now();
        let last_seen = peer_ids.iter().cloned().map(|id| (id, now)).collect();
        FailureDetector {
            peer_ids,
            last_seen,
            leader_timeout,
            leader_id: None,
        }
    }

    pub fn record_heartbeat(&mut self, sender_id: &str) {
        if self.peer_ids.iter().any(|p| p == sender_id) {
            self.last_seen.insert(sender_id.to_string(), Instant::now());
        }
    }

    pub fn set_leader(&mut self, leader_id: impl Into<String>) {
        let leader_id = leader_id.into();
        self.last_seen.insert(leader_id.clone(), Instant::now());
        self.leader_id = Some(leader_id);
    }

    /// Whether the current leader has not been heard from within the
    /// configured timeout. Returns `false` if no leader is known.
    pub fn leader_looks_down(&self) -> bool {
        match &self.leader_id {
            None => false,
            Some(leader_id) => self.time_since_last_contact(leader_id) > self.leader_timeout,
        }
    }

    /// Time since the current leader was last heard from, or `None` if no
    /// leader is known yet.
    pub fn time_since_leader_contact(&self) -> Option<Duration> {
        self.leader_id.as_deref().map(|leader_id| self.time_since_last_contact(leader_id))
    }

    pub fn time_since_last_contact(&self, peer_id: &str) -> Duration {
        match self.last_seen.get(peer_id) {
            Some(instant) => instant.elapsed(),
            None => Duration::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_leader_known_means_not_down() {
        let detector = FailureDetector::new(vec!["b".into()], Duration::from_millis(100));
        assert!(!detector.leader_looks_down());
    }

    #[test]
    fn fresh_heartbeat_keeps_leader_up() {
        let mut detector = FailureDetector::new(vec!["b".into()], Duration::from_millis(200));
        detector.set_leader("b");
        assert!(!detector.leader_looks_down());
    }

    #[test]
    fn unseen_peer_reports_infinite_absence() {
        let detector = FailureDetector::new(vec!["b".into()], Duration::from_millis(100));
        assert_eq!(detector.time_since_last_contact("ghost"), Duration::MAX);
    }
}
