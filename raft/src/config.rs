use std::time::Duration;

/// Tunables for the election and replication timers. Defaults follow the
/// source's raft loop: a 100ms heartbeat and a randomized 1.0-2.5s election
/// timeout, kept well above the heartbeat to avoid spurious elections.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            heartbeat_interval: Duration::from_millis(100),
            election_timeout_min: Duration::from_millis(1000),
            election_timeout_max: Duration::from_millis(2500),
        }
    }
}

impl RaftConfig {
    pub fn random_election_timeout(&self) -> Duration {
        use rand::Rng;
        let min = self.election_timeout_min.as_millis() as u64;
        let max = self.election_timeout_max.as_millis() as u64;
        let millis = rand::thread_rng().gen_range(min..=max);
        Duration::from_millis(millis)
    }
}
