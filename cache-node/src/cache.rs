//! The MESI cache-line engine: a bounded LRU cache whose lines carry a
//! coherence state, kept consistent with peers through best-effort
//! invalidation broadcasts. All state mutation here is synchronous; only
//! the outbound broadcast in [`CacheEngine::write`] suspends, so LRU order
//! and state transitions are atomic with respect to local operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use storage::KeyValueStore;
use sync_common::NodeCommunication;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

struct CacheLine {
    value: String,
    state: LineState,
    #[allow(dead_code)]
    last_used: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadStatus {
    Hit,
    MissFetched,
    MissNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteStatus {
    WriteHitModified,
    WriteHitInvalidating,
    WriteMissInvalidating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub status: ReadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub status: WriteStatus,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations_sent: AtomicU64,
    invalidations_received: AtomicU64,
    writebacks: AtomicU64,
}

pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub invalidations_sent: u64,
    pub invalidations_received: u64,
    pub writebacks: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Invoked by [`CacheEngine::write`] to tell peers a key just changed.
/// Modeled as a trait rather than calling `NodeCommunication` directly so
/// the engine's unit tests can exercise MESI transitions without standing
/// up HTTP peers.
#[async_trait::async_trait]
pub trait InvalidationBroadcaster: Send + Sync {
    async fn broadcast_invalidate(&self, key: &str);
}

#[async_trait::async_trait]
impl InvalidationBroadcaster for NodeCommunication {
    async fn broadcast_invalidate(&self, key: &str) {
        let results = self
            .broadcast_rpc::<_, serde_json::Value>("/cache/invalidate", &serde_json::json!({ "key": key }), true)
            .await;
        for (peer, result) in results {
            if let Err(err) = result {
                log::warn!("invalidate broadcast to {peer} for {key} failed: {err}");
            }
        }
    }
}

pub struct CacheEngine<B: InvalidationBroadcaster = NodeCommunication> {
    node_id: String,
    max_size: usize,
    lines: Mutex<IndexMap<String, CacheLine>>,
    counters: Counters,
    broadcaster: B,
    main_memory: std::sync::Arc<dyn KeyValueStore>,
}

impl<B: InvalidationBroadcaster> CacheEngine<B> {
    pub fn new(node_id: String, max_size: usize, broadcaster: B, main_memory: std::sync::Arc<dyn KeyValueStore>) -> Self {
        CacheEngine {
            node_id,
            max_size: max_size.max(1),
            lines: Mutex::new(IndexMap::new()),
            counters: Counters::default(),
            broadcaster,
            main_memory,
        }
    }

    pub async fn read(&self, key: &str) -> ReadResponse {
        {
            let mut lines = self.lines.lock().unwrap();
            if let Some(line) = lines.get(key) {
                if line.state != LineState::Invalid {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    let value = line.value.clone();
                    touch(&mut lines, key);
                    log::debug!("cache {}: read hit on {key}", self.node_id);
                    return ReadResponse { status: ReadStatus::Hit, value: Some(value) };
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!("cache {}: read miss on {key}, fetching from main memory", self.node_id);

        match self.main_memory.get(key).await {
            Ok(Some(value)) => {
                self.install(key, value.clone(), LineState::Shared).await;
                ReadResponse { status: ReadStatus::MissFetched, value: Some(value) }
            }
            Ok(None) => ReadResponse { status: ReadStatus::MissNotFound, value: None },
            Err(err) => {
                log::warn!("cache {}: main memory fetch of {key} failed: {err}", self.node_id);
                ReadResponse { status: ReadStatus::MissNotFound, value: None }
            }
        }
    }

    pub async fn write(&self, key: &str, value: String) -> WriteResponse {
        enum Action {
            ModifiedNoBroadcast,
            InvalidatingExisting,
            InvalidatingFresh,
        }

        let action = {
            let mut lines = self.lines.lock().unwrap();
            match lines.get(key).map(|l| l.state) {
                Some(state) if state == LineState::Exclusive || state == LineState::Modified => {
                    if let Some(line) = lines.get_mut(key) {
                        line.value = value.clone();
                        line.state = LineState::Modified;
                    }
                    touch(&mut lines, key);
                    Action::ModifiedNoBroadcast
                }
                Some(LineState::Shared) => {
                    if let Some(line) = lines.get_mut(key) {
                        line.value = value.clone();
                        line.state = LineState::Modified;
                    }
                    touch(&mut lines, key);
                    Action::InvalidatingExisting
                }
                _ => Action::InvalidatingFresh,
            }
        };

        match action {
            Action::ModifiedNoBroadcast => WriteResponse { status: WriteStatus::WriteHitModified },
            Action::InvalidatingExisting => {
                self.broadcast_invalidate(key).await;
                WriteResponse { status: WriteStatus::WriteHitInvalidating }
            }
            Action::InvalidatingFresh => {
                if let Err(err) = self.main_memory.set(key, &value).await {
                    log::warn!("cache {}: write-through of {key} failed: {err}", self.node_id);
                }
                self.install(key, value, LineState::Modified).await;
                self.broadcast_invalidate(key).await;
                WriteResponse { status: WriteStatus::WriteMissInvalidating }
            }
        }
    }

    pub async fn handle_invalidate(&self, key: &str) {
        self.counters.invalidations_received.fetch_add(1, Ordering::Relaxed);

        let writeback = {
            let mut lines = self.lines.lock().unwrap();
            match lines.get_mut(key) {
                Some(line) if line.state == LineState::Modified => {
                    let value = line.value.clone();
                    line.state = LineState::Invalid;
                    Some(value)
                }
                Some(line) => {
                    line.state = LineState::Invalid;
                    None
                }
                None => None,
            }
        };

        if let Some(value) = writeback {
            self.write_back(key, &value).await;
        }

        log::debug!("cache {}: received invalidate for {key}, state -> I", self.node_id);
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let lines = self.lines.lock().unwrap();
        CacheSnapshot {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations_sent: self.counters.invalidations_sent.load(Ordering::Relaxed),
            invalidations_received: self.counters.invalidations_received.load(Ordering::Relaxed),
            writebacks: self.counters.writebacks.load(Ordering::Relaxed),
            size: lines.len(),
            capacity: self.max_size,
        }
    }

    async fn broadcast_invalidate(&self, key: &str) {
        self.counters.invalidations_sent.fetch_add(1, Ordering::Relaxed);
        self.broadcaster.broadcast_invalidate(key).await;
    }

    async fn write_back(&self, key: &str, value: &str) {
        self.counters.writebacks.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.main_memory.set(key, value).await {
            log::warn!("cache {}: write-back of {key} failed: {err}", self.node_id);
        }
        log::debug!("cache {}: wrote back {key} to main memory", self.node_id);
    }

    /// Installs a fresh line, evicting the least-recently-used entry (with
    /// write-back if it was Modified) when the cache is already full.
    async fn install(&self, key: &str, value: String, state: LineState) {
        let evicted = {
            let mut lines = self.lines.lock().unwrap();
            let evicted = if !lines.contains_key(key) && lines.len() >= self.max_size {
                lines.shift_remove_index(0)
            } else {
                None
            };

            lines.insert(key.to_string(), CacheLine { value, state, last_used: Instant::now() });
            touch(&mut lines, key);
            evicted
        };

        if let Some((evicted_key, evicted_line)) = evicted {
            log::debug!("cache {}: LRU eviction -> {evicted_key}", self.node_id);
            if evicted_line.state == LineState::Modified {
                self.write_back(&evicted_key, &evicted_line.value).await;
            }
        }
    }
}

fn touch(lines: &mut IndexMap<String, CacheLine>, key: &str) {
    if let Some(mut line) = lines.shift_remove(key) {
        line.last_used = Instant::now();
        lines.insert(key.to_string(), line);
    }
}
