use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::config::RaftConfig;
use crate::log::Log;
use crate::message::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply, Role};
use crate::state_machine::StateMachine;
use crate::transport::RaftTransport;

#[derive(Debug, Error, Clone)]
pub enum SubmitError {
    #[error("not the leader (current leader: {leader_id:?})")]
    NotLeader { leader_id: Option<String> },
    #[error("command was not committed before the role changed")]
    LostLeadership,
    #[error("command did not commit within the wait budget")]
    TimedOut,
}

struct Inner {
    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    log: Log,
    commit_index: u64,
    last_applied: u64,
    leader_id: Option<String>,
    last_contact: Instant,
    election_timeout: Duration,
    last_heartbeat_sent: Instant,
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    pending: HashMap<u64, oneshot::Sender<bool>>,
}

enum TickAction {
    None,
    SendHeartbeats,
    StartElection,
}

/// A single replica in the cluster: owns the log, the term/vote bookkeeping
/// and the election/heartbeat timers, and applies committed entries to a
/// bound [`StateMachine`].
pub struct RaftNode<S: StateMachine> {
    node_id: String,
    peer_ids: Vec<String>,
    transport: Arc<dyn RaftTransport>,
    state_machine: Arc<S>,
    config: RaftConfig,
    inner: Mutex<Inner>,
}

impl<S: StateMachine + 'static> RaftNode<S> {
    pub fn new(
        node_id: String,
        peer_ids: Vec<String>,
        transport: Arc<dyn RaftTransport>,
        state_machine: Arc<S>,
        config: RaftConfig,
    ) -> Arc<Self> {
        let now = Instant::now();
        let election_timeout = config.random_election_timeout();
        let inner = Inner {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            last_contact: now,
            election_timeout,
            last_heartbeat_sent: now,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            pending: HashMap::new(),
        };
        Arc::new(RaftNode {
            node_id,
            peer_ids,
            transport,
            state_machine,
            config,
            inner: Mutex::new(inner),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.inner.lock().unwrap().role == Role::Leader
    }

    pub fn current_term(&self) -> u64 {
        self.inner.lock().unwrap().current_term
    }

    pub fn leader_id(&self) -> Option<String> {
        self.inner.lock().unwrap().leader_id.clone()
    }

    pub fn commit_index(&self) -> u64 {
        self.inner.lock().unwrap().commit_index
    }

    pub fn role_str(&self) -> &'static str {
        self.inner.lock().unwrap().role.as_str()
    }

    /// Appends `command` to the log if this node is the leader and waits
    /// for it to commit. Returns the committed log index on success.
    pub async fn submit_command(&self, command: serde_json::Value) -> Result<u64, SubmitError> {
        let (index, receiver) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.role != Role::Leader {
                return Err(SubmitError::NotLeader { leader_id: inner.leader_id.clone() });
            }
            let term = inner.current_term;
            let index = inner.log.append(crate::message::LogEntry { term, command });
            let (tx, rx) = oneshot::channel();
            inner.pending.insert(index, tx);
            let match_index = inner.match_index.entry(self.node_id.clone()).or_insert(0);
            *match_index = index;
            (index, rx)
        };

        match tokio::time::timeout(Duration::from_secs(5), receiver).await {
            Ok(Ok(true)) => Ok(index),
            Ok(Ok(false)) => Err(SubmitError::LostLeadership),
            Ok(Err(_)) => Err(SubmitError::LostLeadership),
            Err(_) => Err(SubmitError::TimedOut),
        }
    }

    pub async fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut inner = self.inner.lock().unwrap();

        if args.term < inner.current_term {
            return RequestVoteReply { term: inner.current_term, vote_granted: false };
        }
        if args.term > inner.current_term {
            step_down(&mut inner, args.term);
        }

        let already_voted_elsewhere = inner
            .voted_for
            .as_ref()
            .is_some_and(|v| v != &args.candidate_id);
        let log_ok = inner.log.is_at_least_as_up_to_date(args.last_log_term, args.last_log_index);

        let granted = !already_voted_elsewhere && log_ok;
        if granted {
            inner.voted_for = Some(args.candidate_id);
            inner.last_contact = Instant::now();
        }

        RequestVoteReply { term: inner.current_term, vote_granted: granted }
    }

    pub async fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut inner = self.inner.lock().unwrap();

        if args.term < inner.current_term {
            return AppendEntriesReply { term: inner.current_term, success: false };
        }

        step_down(&mut inner, args.term);
        inner.leader_id = Some(args.leader_id);
        inner.last_contact = Instant::now();

        if args.prev_log_index > 0 && inner.log.term_at(args.prev_log_index) != args.prev_log_term {
            return AppendEntriesReply { term: inner.current_term, success: false };
        }

        if !args.entries.is_empty() {
            inner.log.append_from(args.prev_log_index + 1, &args.entries);
        }

        if args.leader_commit > inner.commit_index {
            inner.commit_index = args.leader_commit.min(inner.log.last_index());
            apply_committed(&mut inner, &self.state_machine);
        }

        AppendEntriesReply { term: inner.current_term, success: true }
    }

    /// Drives the election and heartbeat timers until `shutdown` reports
    /// `true`. Intended to run as a background task for the lifetime of the
    /// node.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let action = {
            let mut inner = self.inner.lock().unwrap();
            match inner.role {
                Role::Leader => {
                    if inner.last_heartbeat_sent.elapsed() >= self.config.heartbeat_interval {
                        inner.last_heartbeat_sent = Instant::now();
                        TickAction::SendHeartbeats
                    } else {
                        TickAction::None
                    }
                }
                Role::Follower | Role::Candidate => {
                    if inner.last_contact.elapsed() >= inner.election_timeout {
                        TickAction::StartElection
                    } else {
                        TickAction::None
                    }
                }
            }
        };

        match action {
            TickAction::SendHeartbeats => self.replicate_to_all().await,
            TickAction::StartElection => self.start_election().await,
            TickAction::None => {}
        }
    }

    async fn start_election(&self) {
        let (term, last_log_index, last_log_term) = {
            let mut inner = self.inner.lock().unwrap();
            inner.current_term += 1;
            inner.role = Role::Candidate;
            inner.voted_for = Some(self.node_id.clone());
            inner.leader_id = None;
            inner.last_contact = Instant::now();
            inner.election_timeout = self.config.random_election_timeout();
            (inner.current_term, inner.log.last_index(), inner.log.last_term())
        };

        if self.peer_ids.is_empty() {
            self.become_leader(term);
            return;
        }

        let args = RequestVoteArgs {
            term,
            candidate_id: self.node_id.clone(),
            last_log_index,
            last_log_term,
        };

        let replies = join_all(
            self.peer_ids
                .iter()
                .map(|peer| self.transport.request_vote(peer, args.clone())),
        )
        .await;

        let mut votes = 1u64; // self-vote
        let mut highest_term = term;
        for reply in replies.into_iter().flatten() {
            if reply.term > highest_term {
                highest_term = reply.term;
            }
            if reply.vote_granted && reply.term == term {
                votes += 1;
            }
        }

        let mut inner = self.inner.lock().unwrap();
        if highest_term > inner.current_term {
            step_down(&mut inner, highest_term);
            return;
        }
        if inner.role != Role::Candidate || inner.current_term != term {
            // Another election or a discovered leader overtook this one.
            return;
        }

        let majority = majority_of(self.peer_ids.len());
        if votes as usize >= majority {
            drop(inner);
            self.become_leader(term);
        }
    }

    fn become_leader(&self, term: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_term != term || inner.role == Role::Leader {
            return;
        }
        inner.role = Role::Leader;
        inner.leader_id = Some(self.node_id.clone());
        let next = inner.log.last_index() + 1;
        inner.next_index.clear();
        inner.match_index.clear();
        for peer in &self.peer_ids {
            inner.next_index.insert(peer.clone(), next);
            inner.match_index.insert(peer.clone(), 0);
        }
        inner.match_index.insert(self.node_id.clone(), inner.log.last_index());
        // Force an immediate heartbeat on the next tick.
        inner.last_heartbeat_sent = Instant::now() - self.config.heartbeat_interval;
    }

    async fn replicate_to_all(&self) {
        if self.peer_ids.is_empty() {
            self.advance_commit_index();
            return;
        }

        let requests: Vec<_> = {
            let inner = self.inner.lock().unwrap();
            if inner.role != Role::Leader {
                return;
            }
            self.peer_ids
                .iter()
                .map(|peer| {
                    let next_index = *inner.next_index.get(peer).unwrap_or(&1);
                    let prev_log_index = next_index.saturating_sub(1);
                    let prev_log_term = inner.log.term_at(prev_log_index);
                    let entries = inner.log.entries_from(next_index);
                    let args = AppendEntriesArgs {
                        term: inner.current_term,
                        leader_id: self.node_id.clone(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit: inner.commit_index,
                    };
                    (peer.clone(), next_index, args)
                })
                .collect()
        };

        let replies = join_all(requests.into_iter().map(|(peer, next_index, args)| {
            let sent_entry_count = args.entries.len() as u64;
            let prev_log_index = args.prev_log_index;
            async move {
                let reply = self.transport.append_entries(&peer, args).await;
                (peer, next_index, prev_log_index, sent_entry_count, reply)
            }
        }))
        .await;

        let mut inner = self.inner.lock().unwrap();
        if inner.role != Role::Leader {
            return;
        }

        for (peer, next_index, prev_log_index, sent_entry_count, reply) in replies {
            let Ok(reply) = reply else { continue };
            if reply.term > inner.current_term {
                step_down(&mut inner, reply.term);
                return;
            }
            if reply.success {
                let new_match = prev_log_index + sent_entry_count;
                inner.match_index.insert(peer.clone(), new_match);
                inner.next_index.insert(peer, new_match + 1);
            } else {
                inner.next_index.insert(peer, next_index.saturating_sub(1).max(1));
            }
        }

        advance_commit_index_locked(&mut inner, &self.peer_ids);
        apply_committed(&mut inner, &self.state_machine);
    }

    fn advance_commit_index(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.role != Role::Leader {
            return;
        }
        advance_commit_index_locked(&mut inner, &self.peer_ids);
        apply_committed(&mut inner, &self.state_machine);
    }
}

/// Majority size of a cluster with `peer_count` peers plus this node.
fn majority_of(peer_count: usize) -> usize {
    (peer_count + 1) / 2 + 1
}

fn step_down(inner: &mut Inner, new_term: u64) {
    if new_term > inner.current_term {
        inner.current_term = new_term;
        inner.voted_for = None;
    }
    if inner.role != Role::Follower {
        // A deposed leader's in-flight waiters can no longer be guaranteed
        // to commit; tell them to retry against the new leader.
        for (_, sender) in inner.pending.drain() {
            let _ = sender.send(false);
        }
    }
    inner.role = Role::Follower;
}

fn advance_commit_index_locked(inner: &mut Inner, peer_ids: &[String]) {
    let majority = majority_of(peer_ids.len());
    let last_index = inner.log.last_index();
    let mut n = last_index;
    while n > inner.commit_index {
        if inner.log.term_at(n) == inner.current_term {
            let mut count = 1; // self
            for peer in peer_ids {
                if *inner.match_index.get(peer).unwrap_or(&0) >= n {
                    count += 1;
                }
            }
            if count >= majority {
                inner.commit_index = n;
                break;
            }
        }
        n -= 1;
    }
}

fn apply_committed<S: StateMachine>(inner: &mut Inner, state_machine: &Arc<S>) {
    while inner.last_applied < inner.commit_index {
        inner.last_applied += 1;
        let index = inner.last_applied;
        if let Some(entry) = inner.log.entry_at(index) {
            state_machine.apply(index, &entry.command);
        }
        if let Some(sender) = inner.pending.remove(&index) {
            let _ = sender.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::NoopStateMachine;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;
    use std::sync::Mutex as StdMutex;

    type TestNode = RaftNode<NoopStateMachine>;

    struct Registry {
        nodes: StdMutex<Map<String, Arc<TestNode>>>,
    }

    struct RegistryTransport {
        registry: Arc<Registry>,
    }

    #[async_trait]
    impl RaftTransport for RegistryTransport {
        async fn request_vote(&self, peer_id: &str, args: RequestVoteArgs) -> Result<RequestVoteReply, String> {
            let node = self.registry.nodes.lock().unwrap().get(peer_id).cloned();
            match node {
                Some(node) => Ok(node.handle_request_vote(args).await),
                None => Err(format!("unknown peer {peer_id}")),
            }
        }

        async fn append_entries(&self, peer_id: &str, args: AppendEntriesArgs) -> Result<AppendEntriesReply, String> {
            let node = self.registry.nodes.lock().unwrap().get(peer_id).cloned();
            match node {
                Some(node) => Ok(node.handle_append_entries(args).await),
                None => Err(format!("unknown peer {peer_id}")),
            }
        }
    }

    fn build_cluster(ids: &[&str]) -> (Arc<Registry>, Vec<Arc<TestNode>>) {
        let registry = Arc::new(Registry { nodes: StdMutex::new(Map::new()) });
        let mut nodes = Vec::new();
        for id in ids {
            let peers: Vec<String> = ids.iter().filter(|p| **p != *id).map(|p| p.to_string()).collect();
            let transport = Arc::new(RegistryTransport { registry: registry.clone() });
            let node = RaftNode::new(
                id.to_string(),
                peers,
                transport,
                Arc::new(NoopStateMachine),
                RaftConfig::default(),
            );
            nodes.push(node);
        }
        {
            let mut map = registry.nodes.lock().unwrap();
            for node in &nodes {
                map.insert(node.node_id().to_string(), node.clone());
            }
        }
        (registry, nodes)
    }

    async fn run_ticks(nodes: &[Arc<TestNode>], rounds: usize) {
        for _ in 0..rounds {
            for node in nodes {
                node.tick().await;
            }
            tokio::time::advance(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn election_converges_on_a_single_leader() {
        let (_registry, nodes) = build_cluster(&["n1", "n2", "n3"]);

        // Push every node past its election timeout.
        tokio::time::advance(Duration::from_millis(3000)).await;
        run_ticks(&nodes, 5).await;

        let leaders: Vec<_> = nodes.iter().filter(|n| n.is_leader()).collect();
        assert_eq!(leaders.len(), 1, "expected exactly one leader to emerge");
    }

    #[tokio::test(start_paused = true)]
    async fn committed_command_is_applied_on_every_node() {
        let (_registry, nodes) = build_cluster(&["n1", "n2", "n3"]);

        tokio::time::advance(Duration::from_millis(3000)).await;
        run_ticks(&nodes, 5).await;

        let leader = nodes.iter().find(|n| n.is_leader()).expect("a leader must exist").clone();

        let submit = tokio::spawn(async move { leader.submit_command(serde_json::json!({"op": "noop"})).await });

        run_ticks(&nodes, 10).await;

        let result = submit.await.unwrap();
        assert!(result.is_ok(), "leader should have committed the command: {result:?}");

        let committed_index = result.unwrap();
        for node in &nodes {
            assert!(node.commit_index() >= committed_index);
        }
    }

    #[tokio::test]
    async fn vote_is_refused_for_a_stale_term() {
        let (_registry, nodes) = build_cluster(&["n1", "n2"]);
        let node = &nodes[0];

        {
            let mut inner = node.inner.lock().unwrap();
            inner.current_term = 5;
        }

        let reply = node
            .handle_request_vote(RequestVoteArgs {
                term: 3,
                candidate_id: "n2".to_string(),
                last_log_index: 0,
                last_log_term: 0,
            })
            .await;

        assert_eq!(reply.term, 5);
        assert!(!reply.vote_granted);
    }

    #[tokio::test]
    async fn append_entries_rejects_on_log_mismatch() {
        let (_registry, nodes) = build_cluster(&["n1", "n2"]);
        let node = &nodes[0];

        let reply = node
            .handle_append_entries(AppendEntriesArgs {
                term: 1,
                leader_id: "n2".to_string(),
                prev_log_index: 5,
                prev_log_term: 1,
                entries: vec![],
                leader_commit: 0,
            })
            .await;

        assert!(!reply.success);
    }
}
