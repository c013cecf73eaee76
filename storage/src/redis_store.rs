use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::KeyValueStore;

/// A real external key-value store backend, reached over `REDIS_HOST`.
/// Implements exactly the subset of commands the queue and cache engines
/// use, with `RPOPLPUSH` relied on for its native atomicity.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(host: &str) -> Result<Self, StoreError> {
        let url = if host.contains("://") {
            host.to_string()
        } else {
            format!("redis://{host}:6379")
        };
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisStore { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn.clone().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.clone().set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.clone().rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.clone().lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn.clone().rpoplpush(src, dst).await?)
    }

    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.conn.clone().lrem(key, 1, value).await?;
        Ok(removed > 0)
    }

    async fn hset(&self, hash_key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.conn.clone().hset::<_, _, _, ()>(hash_key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, hash_key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn.clone().hget(hash_key, field).await?)
    }

    async fn hdel(&self, hash_key: &str, field: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.conn.clone().hdel(hash_key, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, hash_key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let map: std::collections::HashMap<String, String> = self.conn.clone().hgetall(hash_key).await?;
        Ok(map.into_iter().collect())
    }

    async fn scan_hash_keys(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{prefix}*{suffix}");
        Ok(self.conn.clone().keys(pattern).await?)
    }
}
