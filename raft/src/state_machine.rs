/// A deterministic command applier bound to a [`RaftNode`](crate::node::RaftNode).
///
/// The replication layer is agnostic to what `command` means; it only
/// guarantees that every node applies the same commands in the same order.
/// Implementors (the lock table, in this workspace) own the actual
/// semantics.
pub trait StateMachine: Send + Sync {
    /// Applies a committed command. Called with the commit-index mutex
    /// held by the caller, in strict log order - implementations must not
    /// block on anything that could itself wait on replication.
    fn apply(&self, index: u64, command: &serde_json::Value);
}

/// A state machine that discards every command, useful for exercising the
/// replication layer in isolation.
pub struct NoopStateMachine;

impl StateMachine for NoopStateMachine {
    fn apply(&self, _index: u64, _command: &serde_json::Value) {}
}
