//! The external key-value store contract: "main memory" for the MESI cache
//! and the backing persistence for the queue engine's lists and pending
//! maps. [`InMemoryStore`] is a faithful in-process stand-in for tests and
//! local runs, [`RedisStore`] talks to a real external store over
//! `REDIS_HOST`.

pub mod error;
pub mod in_memory;
pub mod models;
pub mod redis_store;

pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use models::Expiry;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;

/// The subset of list/hash/string operations the queue and cache engines
/// need from an external key-value store. Every call is a suspension
/// point, never awaited while holding a local state lock.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically pops the tail of `src` and pushes it to the head of `dst`,
    /// returning the moved value (or `None` if `src` was empty).
    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError>;

    /// Removes the first occurrence of `value` from the list at `key`.
    /// Returns whether an occurrence was removed.
    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn hset(&self, hash_key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hget(&self, hash_key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Deletes `field` from the hash at `hash_key`. Returns whether it was
    /// present.
    async fn hdel(&self, hash_key: &str, field: &str) -> Result<bool, StoreError>;
    async fn hgetall(&self, hash_key: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Lists the hash keys matching `prefix..*..suffix`, standing in for a
    /// `KEYS pending_q:*_meta` scan.
    async fn scan_hash_keys(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StoreError>;
}

/// Connects to the real external store at `redis_host`, falling back to the
/// in-process stand-in (with a warning) if it can't be reached. Lets both
/// the queue and cache node binaries run against a real backend in
/// production and locally/in tests with nothing else running.
pub async fn connect_or_fallback(redis_host: &str) -> Arc<dyn KeyValueStore> {
    match RedisStore::connect(redis_host).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            log::warn!("could not reach external key-value store at {redis_host} ({err}); using in-process stand-in");
            Arc::new(InMemoryStore::new())
        }
    }
}
