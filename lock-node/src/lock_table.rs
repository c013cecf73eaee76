//! The lock manager's apply-step: a pure function of the replicated log.
//! Every replica applying the same command sequence reaches the same
//! table, independent of wall-clock timing on that replica.

use std::collections::HashMap;
use std::sync::Mutex;

use raft::StateMachine;
use serde::{Deserialize, Serialize};
use storage::Expiry;
use tokio::sync::oneshot;

/// The client id the deadlock monitor submits RELEASE commands under. Any
/// RELEASE carrying this id is a forced release regardless of holder
/// membership.
pub const SYSTEM_TIMEOUT: &str = "SYSTEM_TIMEOUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "ACQUIRE")]
    Acquire { lock_name: String, lock_type: LockType, client_id: String, expiry: Expiry },
    #[serde(rename = "RELEASE")]
    Release { lock_name: String, client_id: String },
}

#[derive(Debug, Clone)]
pub struct LockRecord {
    pub lock_type: LockType,
    pub holders: Vec<String>,
    pub expiry: Expiry,
}

/// Key identifying a single pending waiter: a client's in-flight acquire of
/// a specific lock.
type WaiterKey = (String, String);

/// The replicated lock table plus the local (non-replicated) waiter
/// registry used to wake a client's acquire call the moment a grant lands.
pub struct LockTable {
    locks: Mutex<HashMap<String, LockRecord>>,
    waiters: Mutex<HashMap<WaiterKey, oneshot::Sender<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable { locks: Mutex::new(HashMap::new()), waiters: Mutex::new(HashMap::new()) }
    }

    /// Registers a one-shot waiter for `(lock_name, client_id)`, returning
    /// the receiving half. Must be called before the corresponding ACQUIRE
    /// command is submitted, so a fast apply can never race ahead of
    /// registration.
    pub fn register_waiter(&self, lock_name: &str, client_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert((lock_name.to_string(), client_id.to_string()), tx);
        rx
    }

    pub fn forget_waiter(&self, lock_name: &str, client_id: &str) {
        self.waiters.lock().unwrap().remove(&(lock_name.to_string(), client_id.to_string()));
    }

    pub fn is_holder(&self, lock_name: &str, client_id: &str) -> bool {
        self.locks
            .lock()
            .unwrap()
            .get(lock_name)
            .is_some_and(|record| record.holders.iter().any(|h| h == client_id))
    }

    /// Lock names whose expiry has passed, for the deadlock monitor.
    pub fn expired_lock_names(&self) -> Vec<String> {
        self.locks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, record)| record.expiry.is_past())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn apply_acquire(&self, lock_name: String, lock_type: LockType, client_id: String, expiry: Expiry) {
        let mut locks = self.locks.lock().unwrap();
        let granted = match locks.get(&lock_name) {
            None => true,
            Some(existing) => existing.lock_type == LockType::Shared && lock_type == LockType::Shared,
        };

        if !granted {
            return;
        }

        locks
            .entry(lock_name.clone())
            .and_modify(|record| {
                if !record.holders.contains(&client_id) {
                    record.holders.push(client_id.clone());
                }
                record.expiry = record.expiry.max(expiry);
            })
            .or_insert_with(|| LockRecord { lock_type, holders: vec![client_id.clone()], expiry });
        drop(locks);

        if let Some(sender) = self.waiters.lock().unwrap().remove(&(lock_name, client_id)) {
            let _ = sender.send(());
        }
    }

    fn apply_release(&self, lock_name: String, client_id: String) {
        let mut locks = self.locks.lock().unwrap();
        if client_id == SYSTEM_TIMEOUT {
            locks.remove(&lock_name);
            return;
        }
        if let Some(record) = locks.get_mut(&lock_name) {
            record.holders.retain(|h| h != &client_id);
            if record.holders.is_empty() {
                locks.remove(&lock_name);
            }
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for LockTable {
    fn apply(&self, _index: u64, command: &serde_json::Value) {
        let command: Command = match serde_json::from_value(command.clone()) {
            Ok(command) => command,
            Err(err) => {
                log::warn!("dropping unparseable lock command: {err}");
                return;
            }
        };

        match command {
            Command::Acquire { lock_name, lock_type, client_id, expiry } => {
                self.apply_acquire(lock_name, lock_type, client_id, expiry);
            }
            Command::Release { lock_name, client_id } => {
                self.apply_release(lock_name, client_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_is_denied_while_held() {
        let table = LockTable::new();
        table.apply(1, &serde_json::to_value(Command::Acquire {
            lock_name: "R".into(),
            lock_type: LockType::Exclusive,
            client_id: "c1".into(),
            expiry: Expiry::from_millis(i64::MAX),
        }).unwrap());
        table.apply(2, &serde_json::to_value(Command::Acquire {
            lock_name: "R".into(),
            lock_type: LockType::Exclusive,
            client_id: "c2".into(),
            expiry: Expiry::from_millis(i64::MAX),
        }).unwrap());

        assert!(table.is_holder("R", "c1"));
        assert!(!table.is_holder("R", "c2"));
    }

    #[test]
    fn shared_locks_stack_but_exclusive_excludes_them() {
        let table = LockTable::new();
        let acquire = |name: &str, ty: LockType, client: &str| Command::Acquire {
            lock_name: name.into(),
            lock_type: ty,
            client_id: client.into(),
            expiry: Expiry::from_millis(i64::MAX),
        };

        table.apply(1, &serde_json::to_value(acquire("R", LockType::Shared, "c1")).unwrap());
        table.apply(2, &serde_json::to_value(acquire("R", LockType::Shared, "c2")).unwrap());
        table.apply(3, &serde_json::to_value(acquire("R", LockType::Exclusive, "c3")).unwrap());

        assert!(table.is_holder("R", "c1"));
        assert!(table.is_holder("R", "c2"));
        assert!(!table.is_holder("R", "c3"));
    }

    #[test]
    fn system_timeout_release_forces_the_record_away() {
        let table = LockTable::new();
        table.apply(1, &serde_json::to_value(Command::Acquire {
            lock_name: "R".into(),
            lock_type: LockType::Exclusive,
            client_id: "c1".into(),
            expiry: Expiry::from_millis(-1),
        }).unwrap());

        assert_eq!(table.expired_lock_names(), vec!["R".to_string()]);

        table.apply(2, &serde_json::to_value(Command::Release {
            lock_name: "R".into(),
            client_id: SYSTEM_TIMEOUT.into(),
        }).unwrap());

        assert!(!table.is_holder("R", "c1"));
        assert!(table.expired_lock_names().is_empty());
    }

    #[test]
    fn releasing_a_lock_never_held_is_a_harmless_no_op() {
        let table = LockTable::new();
        table.apply(1, &serde_json::to_value(Command::Release {
            lock_name: "R".into(),
            client_id: "ghost".into(),
        }).unwrap());
        assert!(!table.is_holder("R", "ghost"));
    }

    #[test]
    fn grant_wakes_a_registered_waiter() {
        let table = LockTable::new();
        let rx = table.register_waiter("R", "c1");

        table.apply(1, &serde_json::to_value(Command::Acquire {
            lock_name: "R".into(),
            lock_type: LockType::Exclusive,
            client_id: "c1".into(),
            expiry: Expiry::from_millis(i64::MAX),
        }).unwrap());

        assert!(rx.try_recv().is_ok());
    }
}
