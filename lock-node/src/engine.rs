use std::sync::Arc;
use std::time::Duration;

use raft::{RaftNode, SubmitError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use storage::Expiry;
use tokio::sync::watch;

use crate::lock_table::{Command, LockTable, LockType, SYSTEM_TIMEOUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireError {
    NotLeader,
    SubmitFailed,
    LockTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AcquireError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub lock_name: String,
    #[serde(default = "default_lock_type")]
    pub lock_type: LockType,
    pub client_id: String,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

fn default_lock_type() -> LockType {
    LockType::Exclusive
}

fn default_timeout() -> f64 {
    10.0
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub lock_name: String,
    pub client_id: String,
}

/// Ties the raft replication layer to the lock table and exposes the
/// client-facing acquire/release operations described for the lock tier.
pub struct LockEngine {
    raft: Arc<RaftNode<LockTable>>,
    lock_table: Arc<LockTable>,
}

impl LockEngine {
    pub fn new(raft: Arc<RaftNode<LockTable>>, lock_table: Arc<LockTable>) -> Self {
        LockEngine { raft, lock_table }
    }

    pub fn raft(&self) -> &Arc<RaftNode<LockTable>> {
        &self.raft
    }

    pub async fn acquire(&self, request: AcquireRequest) -> AcquireResponse {
        if !self.raft.is_leader() {
            return AcquireResponse {
                success: false,
                error: Some(AcquireError::NotLeader),
                leader_hint: self.raft.leader_id(),
                message: None,
            };
        }

        let expiry = Expiry::from_now(Duration::from_secs_f64(request.timeout.max(0.0)));
        let command = Command::Acquire {
            lock_name: request.lock_name.clone(),
            lock_type: request.lock_type,
            client_id: request.client_id.clone(),
            expiry,
        };

        let waiter = self.lock_table.register_waiter(&request.lock_name, &request.client_id);

        let submitted = self.raft.submit_command(serde_json::to_value(&command).unwrap()).await;
        if let Err(err) = submitted {
            self.lock_table.forget_waiter(&request.lock_name, &request.client_id);
            return match err {
                SubmitError::NotLeader { leader_id } => AcquireResponse {
                    success: false,
                    error: Some(AcquireError::NotLeader),
                    leader_hint: leader_id,
                    message: None,
                },
                SubmitError::LostLeadership | SubmitError::TimedOut => AcquireResponse {
                    success: false,
                    error: Some(AcquireError::SubmitFailed),
                    leader_hint: self.raft.leader_id(),
                    message: None,
                },
            };
        }

        let epsilon = Duration::from_millis(500);
        let wait_budget = Duration::from_secs_f64(request.timeout.max(0.0)) + epsilon;

        match tokio::time::timeout(wait_budget, waiter).await {
            Ok(Ok(())) => AcquireResponse { success: true, error: None, leader_hint: None, message: None },
            _ => {
                self.lock_table.forget_waiter(&request.lock_name, &request.client_id);
                AcquireResponse {
                    success: self.lock_table.is_holder(&request.lock_name, &request.client_id),
                    error: Some(AcquireError::LockTimeout),
                    leader_hint: None,
                    message: None,
                }
            }
        }
    }

    pub async fn release(&self, request: ReleaseRequest) -> ReleaseResponse {
        let command = Command::Release { lock_name: request.lock_name, client_id: request.client_id };
        match self.raft.submit_command(serde_json::to_value(&command).unwrap()).await {
            Ok(_) => ReleaseResponse { success: true, message: None },
            Err(SubmitError::NotLeader { leader_id }) => ReleaseResponse {
                success: false,
                message: Some(format!("not leader, retry against {leader_id:?}")),
            },
            Err(_) => ReleaseResponse { success: false, message: Some("submit failed, retry".to_string()) },
        }
    }

    /// Runs on the leader only: every 0.5-1.0s, submits a forced RELEASE
    /// for every lock record whose expiry has passed.
    pub async fn run_deadlock_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let sleep_ms = rand::thread_rng().gen_range(500..=1000);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if !self.raft.is_leader() {
                continue;
            }

            for lock_name in self.lock_table.expired_lock_names() {
                let command = Command::Release { lock_name: lock_name.clone(), client_id: SYSTEM_TIMEOUT.to_string() };
                if let Err(err) = self.raft.submit_command(serde_json::to_value(&command).unwrap()).await {
                    log::warn!("deadlock monitor failed to submit release for {lock_name}: {err}");
                } else {
                    log::info!("deadlock monitor force-released expired lock {lock_name}");
                }
            }
        }
    }
}
