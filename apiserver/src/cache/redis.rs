use super::{CacheError, CacheStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

const KEY_PREFIX: &str = "cluster-registry:cache";
const TAG_PREFIX: &str = "cluster-registry:tag";

/// Cache backend shared by every apiserver replica.
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    /// `host` is `host:port`, or a full `redis://` URL.
    pub fn new(host: &str) -> Result<Self, CacheError> {
        let url = if host.contains("://") {
            host.to_string()
        } else {
            format!("redis://{host}")
        };
        let client = redis::Client::open(url).map_err(backend)?;
        Ok(RedisCacheStore { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)
    }
}

fn backend(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

fn entry_key(key: u64) -> String {
    format!("{KEY_PREFIX}:{key:016x}")
}

fn tag_key(tag: &str) -> String {
    format!("{TAG_PREFIX}:{tag}")
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: u64) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get(entry_key(key)).await.map_err(backend)
    }

    async fn set(&self, key: u64, value: Vec<u8>, ttl: Duration, tags: &[&str]) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let entry = entry_key(key);
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn.pset_ex(&entry, value, millis).await.map_err(backend)?;
        for tag in tags {
            let _: () = conn.sadd(tag_key(tag), &entry).await.map_err(backend)?;
        }
        Ok(())
    }

    async fn delete(&self, key: u64) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(entry_key(key)).await.map_err(backend)?;
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let tag = tag_key(tag);
        let mut keys: Vec<String> = conn.smembers(&tag).await.map_err(backend)?;
        keys.push(tag);
        let _: () = conn.del(keys).await.map_err(backend)?;
        Ok(())
    }
}
