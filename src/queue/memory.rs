use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::queue::store::QueueStore;
use crate::worker::error::WorkerError;

/// In-memory [`QueueStore`] for tests and local development.
///
/// Lists and hashes live in mutex-guarded maps keyed the same way the Redis
/// implementation keys them, so the engine behaves identically against
/// either backend. Locks are never held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>, WorkerError> {
        mutex
            .lock()
            .map_err(|e| WorkerError::Store(format!("memory store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_back(&self, key: &str, value: &str) -> Result<(), WorkerError> {
        let mut lists = Self::lock(&self.lists)?;
        lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, WorkerError> {
        let mut lists = Self::lock(&self.lists)?;
        Ok(lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn list_len(&self, key: &str) -> Result<u64, WorkerError> {
        let lists = Self::lock(&self.lists)?;
        Ok(lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), WorkerError> {
        let mut hashes = Self::lock(&self.hashes)?;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, WorkerError> {
        let hashes = Self::lock(&self.hashes)?;
        Ok(hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), WorkerError> {
        let mut hashes = Self::lock(&self.hashes)?;
        if let Some(hash) = hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hash_len(&self, key: &str) -> Result<u64, WorkerError> {
        let hashes = Self::lock(&self.hashes)?;
        Ok(hashes.get(key).map_or(0, |h| h.len() as u64))
    }
}
