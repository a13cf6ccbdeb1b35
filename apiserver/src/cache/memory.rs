use super::{CacheError, CacheStore};
use async_trait::async_trait;
use moka::sync::Cache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// In-process cache backend. Entries carry their own expiration, so the
/// backend only bounds the number of entries.
pub struct MemoryCacheStore {
    entries: Cache<u64, Vec<u8>>,
    tags: Mutex<HashMap<String, HashSet<u64>>>,
}

impl MemoryCacheStore {
    pub fn new(capacity: u64) -> Self {
        MemoryCacheStore {
            entries: Cache::builder().max_capacity(capacity).build(),
            tags: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: u64) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(&key))
    }

    async fn set(&self, key: u64, value: Vec<u8>, _ttl: Duration, tags: &[&str]) -> Result<(), CacheError> {
        self.entries.insert(key, value);
        let mut index = self.tags.lock();
        for tag in tags {
            index.entry((*tag).to_string()).or_default().insert(key);
        }
        Ok(())
    }

    async fn delete(&self, key: u64) -> Result<(), CacheError> {
        self.entries.invalidate(&key);
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        let keys = self.tags.lock().remove(tag).unwrap_or_default();
        for key in keys {
            self.entries.invalidate(&key);
        }
        Ok(())
    }
}
