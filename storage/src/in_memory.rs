use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::KeyValueStore;

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// A faithful in-process stand-in for the external key-value store,
/// covering strings, lists, and hash maps, enough for the queue and
/// cache engines to run against with nothing else running.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().unwrap().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let popped = state.lists.get_mut(src).and_then(VecDeque::pop_back);
        if let Some(value) = &popped {
            state.lists.entry(dst.to_string()).or_default().push_front(value.clone());
        }
        Ok(popped)
    }

    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.lists.get_mut(key) {
            if let Some(pos) = list.iter().position(|v| v == value) {
                list.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn hset(&self, hash_key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .hashes
            .entry(hash_key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, hash_key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .hashes
            .get(hash_key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hdel(&self, hash_key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .hashes
            .get_mut(hash_key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hgetall(&self, hash_key: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .hashes
            .get(hash_key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn scan_hash_keys(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .hashes
            .keys()
            .filter(|k| k.starts_with(prefix) && k.ends_with(suffix))
            .cloned()
            .collect())
    }
}
